use crate::schema::LayoutVersion;
use log::{debug, warn};

/// Table regions produced by the template without table 3.1.1.
pub const LEGACY_GRID_COUNT: usize = 9;
/// Table regions once table 3.1.1 was introduced.
pub const REVISED_GRID_COUNT: usize = 10;
/// Table regions once the interest-computation breakup was appended.
pub const REVISED_WITH_BREAKUP_GRID_COUNT: usize = 11;

/// Exact lookup of the layout producing `grid_count` table regions.
pub fn layout_for_grid_count(grid_count: usize) -> Option<LayoutVersion> {
    match grid_count {
        LEGACY_GRID_COUNT => Some(LayoutVersion::Legacy),
        REVISED_GRID_COUNT => Some(LayoutVersion::Revised),
        REVISED_WITH_BREAKUP_GRID_COUNT => Some(LayoutVersion::RevisedWithBreakup),
        _ => None,
    }
}

/// Decides the layout of one return from its raw grid count.
///
/// Total: counts that match no known template resolve to the newest layout
/// and are logged, so a template change never stops the run.
pub fn classify(source: &str, grid_count: usize) -> LayoutVersion {
    match layout_for_grid_count(grid_count) {
        Some(layout) => {
            debug!("{} has {} table regions: {}", source, grid_count, layout);
            layout
        }
        None => {
            warn!(
                "{} has {} table regions, which matches no known layout; assuming {}",
                source,
                grid_count,
                LayoutVersion::NEWEST
            );
            LayoutVersion::NEWEST
        }
    }
}
