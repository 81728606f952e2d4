//! Reduces a raw fix stream to the fixes worth reporting for one window.
//!
//! Passes run in a fixed order over the time-ordered stream:
//! 1. `(0, 0)` "no fix" sentinels are removed unless the caller keeps them.
//! 2. Fixes implying an impossible jump from the last retained fix are removed.
//! 3. The interior of every plateau (same tag, same coordinates) is collapsed,
//!    keeping the first and last reading of the run.
//! 4. What is left is clipped to `[start, end)`.
//!
//! Running the passes over their own output changes nothing.

use tracing::debug;

use crate::config::DedupConfig;
use crate::kinematics::{distance_m, implied_speed_mph};
use crate::models::{sort_fixes, PositionFix, ReportWindow};

pub fn retain_fixes(
    fixes: &[PositionFix],
    window: &ReportWindow,
    config: &DedupConfig,
) -> Vec<PositionFix> {
    if fixes.is_empty() || window.is_empty() {
        return Vec::new();
    }

    let mut ordered = fixes.to_vec();
    sort_fixes(&mut ordered);

    let plausible = drop_implausible(ordered, config);
    let collapsed = collapse_plateaus(plausible);
    let total = collapsed.len();

    let retained: Vec<PositionFix> = collapsed
        .into_iter()
        .filter(|fix| window.contains(fix.recorded_at))
        .collect();

    debug!(
        raw = fixes.len(),
        before_window = total,
        retained = retained.len(),
        "retained fixes for report window"
    );
    retained
}

fn is_implausible(last: &PositionFix, fix: &PositionFix, max_speed_mph: f64) -> bool {
    if fix.recorded_at == last.recorded_at {
        return distance_m(last, fix) > 0.0;
    }
    implied_speed_mph(last, fix) > max_speed_mph
}

fn drop_implausible(fixes: Vec<PositionFix>, config: &DedupConfig) -> Vec<PositionFix> {
    let mut kept: Vec<PositionFix> = Vec::with_capacity(fixes.len());
    // Index into `kept` of the last non-sentinel fix, the reference for speed checks.
    let mut reference: Option<usize> = None;

    for fix in fixes {
        if fix.is_zero_fix() {
            if config.keep_zero_coordinates {
                kept.push(fix);
            }
            continue;
        }

        if let Some(last) = reference.map(|i| &kept[i]) {
            if is_implausible(last, &fix, config.max_speed_mph) {
                debug!(position_id = fix.position_id, "dropping implausible fix");
                continue;
            }
        }

        reference = Some(kept.len());
        kept.push(fix);
    }

    kept
}

fn collapse_plateaus(fixes: Vec<PositionFix>) -> Vec<PositionFix> {
    let redundant: Vec<bool> = (0..fixes.len())
        .map(|i| {
            if i == 0 || i + 1 == fixes.len() {
                return false;
            }
            let fix = &fixes[i];
            fix.same_reading(&fixes[i - 1]) && fix.same_reading(&fixes[i + 1])
        })
        .collect();

    fixes
        .into_iter()
        .zip(redundant)
        .filter_map(|(fix, redundant)| (!redundant).then_some(fix))
        .collect()
}
