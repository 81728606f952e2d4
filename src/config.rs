//! Tunables for the trail pipeline and the static map request.

/// Fixes implying a faster jump than this from the last retained fix are dropped.
pub const MAX_PLAUSIBLE_SPEED_MPH: f64 = 300.0;

/// A hop longer than this from the last kept point is treated as a GPS glitch.
pub const GLITCH_DISTANCE_CAP_M: f64 = 9999.0;

/// Number of trailing points cut from the movement log.
///
/// The statement format has always cut the final 28 log rows to suppress noise
/// recorded while the tag is being removed or docked. The figure is inherited
/// from the reporting convention, not derived from the data.
pub const TRAILING_TRIM_POINTS: usize = 28;

/// Static map canvas edge in pixels.
pub const MAP_CANVAS_PX: f64 = 640.0;

/// Longest map request URL the static map service accepts.
pub const MAX_MAP_URL_LEN: usize = 8192;

/// Upper bound on route coarsening passes.
pub const MAX_REDUCTION_ATTEMPTS: u32 = 1024;

pub const STATIC_MAP_URL: &str = "https://maps.googleapis.com/maps/api/staticmap";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupConfig {
    pub max_speed_mph: f64,
    /// Let `(0, 0)` fixes through; only the unmapped CSV trail log wants them.
    pub keep_zero_coordinates: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_speed_mph: MAX_PLAUSIBLE_SPEED_MPH,
            keep_zero_coordinates: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotatorConfig {
    pub glitch_distance_cap_m: f64,
    pub trailing_trim_points: usize,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            glitch_distance_cap_m: GLITCH_DISTANCE_CAP_M,
            trailing_trim_points: TRAILING_TRIM_POINTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub base_url: String,
    /// Read from `STATIC_MAP_KEY`; requests go out unsigned without it.
    pub api_key: Option<String>,
    pub size: String,
    pub scale: u8,
    pub format: String,
    pub maptype: String,
    pub canvas_px: f64,
    pub max_url_len: usize,
    pub max_attempts: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            base_url: STATIC_MAP_URL.to_string(),
            api_key: None,
            size: "640x640".to_string(),
            scale: 2,
            format: "png".to_string(),
            maptype: "roadmap".to_string(),
            canvas_px: MAP_CANVAS_PX,
            max_url_len: MAX_MAP_URL_LEN,
            max_attempts: MAX_REDUCTION_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportConfig {
    pub dedup: DedupConfig,
    pub annotator: AnnotatorConfig,
    pub map: MapConfig,
}

impl ReportConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.map.api_key = std::env::var("STATIC_MAP_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        config
    }

    /// Variant used by the CSV trail log, which keeps `(0, 0)` rows.
    pub fn trail_log_dedup(&self) -> DedupConfig {
        DedupConfig {
            keep_zero_coordinates: true,
            ..self.dedup
        }
    }
}
