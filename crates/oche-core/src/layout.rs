//! Grid arrangement of the UI panels.
//!
//! Independent of the session: a fixed set of panels (camera, screen share,
//! chat) placed on a columns × rows grid. Placements never overlap and never
//! leave the grid. Rectangles are half-open, so two panels sharing an edge do
//! not overlap.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Search radius around a drop target before falling back to a full scan.
const SEARCH_RADIUS: i32 = 6;

/// Panel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelId {
    /// Local or remote camera view.
    Camera,
    /// Screen share view.
    Screenshare,
    /// Chat panel.
    Chat,
}

impl PanelId {
    /// Every panel, in default order.
    pub const ALL: [Self; 3] = [Self::Camera, Self::Screenshare, Self::Chat];

    /// Wire and storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Screenshare => "screenshare",
            Self::Chat => "chat",
        }
    }

    fn glyph(self) -> char {
        match self {
            Self::Camera => 'C',
            Self::Screenshare => 'S',
            Self::Chat => 'M',
        }
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a panel renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    /// A video surface.
    Video,
    /// The chat log.
    Chat,
}

/// A grid rectangle, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// Leftmost column.
    pub x: u16,
    /// Top row.
    pub y: u16,
    /// Columns spanned.
    pub w: u16,
    /// Rows spanned.
    pub h: u16,
}

impl Rect {
    /// Rectangle at (`x`, `y`) spanning `w` × `h`.
    pub const fn new(x: u16, y: u16, w: u16, h: u16) -> Self {
        Self { x, y, w, h }
    }

    /// Half-open intersection test.
    pub fn overlaps(&self, other: &Self) -> bool {
        let right = u32::from(self.x) + u32::from(self.w);
        let bottom = u32::from(self.y) + u32::from(self.h);
        let other_right = u32::from(other.x) + u32::from(other.w);
        let other_bottom = u32::from(other.y) + u32::from(other.h);

        u32::from(self.x) < other_right
            && u32::from(other.x) < right
            && u32::from(self.y) < other_bottom
            && u32::from(other.y) < bottom
    }

    fn contains(&self, col: u16, row: u16) -> bool {
        (self.x..self.x.saturating_add(self.w)).contains(&col)
            && (self.y..self.y.saturating_add(self.h)).contains(&row)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{} {}x{}", self.x, self.y, self.w, self.h)
    }
}

/// One placed panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridItem {
    /// Panel identifier.
    pub id: PanelId,
    /// Header shown above the panel.
    pub title: String,
    /// What the panel renders.
    pub kind: PanelKind,
    /// Placement.
    pub rect: Rect,
    /// Smallest width a user resize may produce.
    pub min_w: u16,
    /// Smallest height a user resize may produce.
    pub min_h: u16,
}

/// Grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Column count.
    pub columns: u16,
    /// Row count.
    pub rows: u16,
    /// Gap between cells, in pixels.
    pub gap: u16,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self { columns: 12, rows: 8, gap: 16 }
    }
}

/// Layout failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// No template has this name.
    #[error("unknown layout template: {name}")]
    UnknownTemplate {
        /// Requested name.
        name: String,
    },

    /// The panel is not part of this layout.
    #[error("unknown panel: {id}")]
    UnknownItem {
        /// Requested panel.
        id: PanelId,
    },

    /// The panel appears twice.
    #[error("duplicate panel: {id}")]
    DuplicateItem {
        /// Repeated panel.
        id: PanelId,
    },

    /// The rectangle leaves the grid.
    #[error("{id} at {rect} is outside the grid")]
    OutOfBounds {
        /// Panel.
        id: PanelId,
        /// Rejected placement.
        rect: Rect,
    },

    /// The rectangle covers another panel.
    #[error("{id} at {rect} overlaps {other}")]
    Overlap {
        /// Panel.
        id: PanelId,
        /// Rejected placement.
        rect: Rect,
        /// Panel already there.
        other: PanelId,
    },

    /// The rectangle is smaller than the panel allows.
    #[error("{id} must be at least {min_w}x{min_h}")]
    BelowMinimum {
        /// Panel.
        id: PanelId,
        /// Minimum width.
        min_w: u16,
        /// Minimum height.
        min_h: u16,
    },
}

/// Predefined arrangements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutTemplate {
    /// Camera and screen share side by side, chat below right.
    Default,
    /// Large camera.
    FullCamera,
    /// Large screen share.
    FullScreenshare,
    /// Tall chat column.
    ChatFocus,
}

impl LayoutTemplate {
    /// Every template.
    pub const ALL: [Self; 4] = [Self::Default, Self::FullCamera, Self::FullScreenshare, Self::ChatFocus];

    /// Template name as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::FullCamera => "full_camera",
            Self::FullScreenshare => "full_screenshare",
            Self::ChatFocus => "chat_focus",
        }
    }

    /// Placement of each panel.
    pub fn placements(self) -> [(PanelId, Rect); 3] {
        let (camera, screen, chat) = match self {
            Self::Default => (Rect::new(0, 0, 6, 4), Rect::new(6, 0, 6, 4), Rect::new(8, 4, 4, 4)),
            Self::FullCamera => (Rect::new(0, 0, 9, 6), Rect::new(9, 0, 3, 3), Rect::new(9, 3, 3, 5)),
            Self::FullScreenshare => {
                (Rect::new(9, 0, 3, 3), Rect::new(0, 0, 9, 6), Rect::new(9, 3, 3, 5))
            },
            Self::ChatFocus => (Rect::new(0, 0, 4, 4), Rect::new(4, 0, 4, 4), Rect::new(8, 0, 4, 8)),
        };
        [(PanelId::Camera, camera), (PanelId::Screenshare, screen), (PanelId::Chat, chat)]
    }
}

impl FromStr for LayoutTemplate {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| LayoutError::UnknownTemplate { name: s.to_string() })
    }
}

/// The panel grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    config: LayoutConfig,
    items: Vec<GridItem>,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

impl GridLayout {
    /// Grid with the default template applied.
    pub fn new(config: LayoutConfig) -> Self {
        let items = LayoutTemplate::Default
            .placements()
            .into_iter()
            .map(|(id, rect)| {
                let (title, kind, min_w, min_h) = match id {
                    PanelId::Camera => ("Camera", PanelKind::Video, 3, 2),
                    PanelId::Screenshare => ("Screen share", PanelKind::Video, 4, 3),
                    PanelId::Chat => ("Chat", PanelKind::Chat, 3, 3),
                };
                GridItem { id, title: title.to_string(), kind, rect, min_w, min_h }
            })
            .collect();
        Self { config, items }
    }

    /// Grid dimensions.
    pub fn config(&self) -> LayoutConfig {
        self.config
    }

    /// Placed panels.
    pub fn items(&self) -> &[GridItem] {
        &self.items
    }

    /// Look up a panel.
    pub fn item(&self, id: PanelId) -> Option<&GridItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Whether `id` may occupy `rect`: inside the grid and clear of every
    /// other panel.
    pub fn is_valid_position(&self, id: PanelId, rect: Rect) -> bool {
        self.check_position(id, rect).is_ok()
    }

    /// Closest valid placement of a `rect`-sized panel to `rect`'s origin.
    ///
    /// Tries the exact spot, then squares of growing radius around it
    /// (coordinates clamped at zero), then every cell in row-major order.
    /// Returns `rect` unchanged if nothing fits.
    pub fn find_nearest_valid_position(&self, id: PanelId, rect: Rect) -> Rect {
        if self.is_valid_position(id, rect) {
            return rect;
        }

        let origin_x = i32::from(rect.x);
        let origin_y = i32::from(rect.y);
        for radius in 1..=SEARCH_RADIUS {
            for dx in -radius..=radius {
                for dy in -radius..=radius {
                    let (Ok(x), Ok(y)) =
                        (u16::try_from((origin_x + dx).max(0)), u16::try_from((origin_y + dy).max(0)))
                    else {
                        continue;
                    };
                    let candidate = Rect { x, y, ..rect };
                    if self.is_valid_position(id, candidate) {
                        return candidate;
                    }
                }
            }
        }

        let max_y = self.config.rows.saturating_sub(rect.h);
        let max_x = self.config.columns.saturating_sub(rect.w);
        for y in 0..=max_y {
            for x in 0..=max_x {
                let candidate = Rect { x, y, ..rect };
                if self.is_valid_position(id, candidate) {
                    return candidate;
                }
            }
        }

        rect
    }

    /// Move or resize a panel.
    ///
    /// Rejected (and the layout left untouched) if the rectangle is below the
    /// panel's minimum size, leaves the grid, or overlaps another panel.
    pub fn update_item(&mut self, id: PanelId, rect: Rect) -> Result<(), LayoutError> {
        let item = self.item(id).ok_or(LayoutError::UnknownItem { id })?;
        if rect.w < item.min_w || rect.h < item.min_h {
            return Err(LayoutError::BelowMinimum { id, min_w: item.min_w, min_h: item.min_h });
        }
        self.check_position(id, rect)?;

        if let Some(item) = self.items.iter_mut().find(|item| item.id == id) {
            item.rect = rect;
        }
        Ok(())
    }

    /// Apply a template by name.
    pub fn apply_template(&mut self, name: &str) -> Result<LayoutTemplate, LayoutError> {
        let template = name.parse()?;
        self.apply(template);
        Ok(template)
    }

    /// Apply a template.
    pub fn apply(&mut self, template: LayoutTemplate) {
        for (id, rect) in template.placements() {
            if let Some(item) = self.items.iter_mut().find(|item| item.id == id) {
                item.rect = rect;
            }
        }
    }

    /// Check every invariant: each panel exactly once, in bounds, no overlap.
    ///
    /// Minimum sizes bind user resizes only; templates may go below them.
    pub fn validate(&self) -> Result<(), LayoutError> {
        for id in PanelId::ALL {
            match self.items.iter().filter(|item| item.id == id).count() {
                0 => return Err(LayoutError::UnknownItem { id }),
                1 => {},
                _ => return Err(LayoutError::DuplicateItem { id }),
            }
        }
        self.items.iter().try_for_each(|item| self.check_position(item.id, item.rect))
    }

    fn check_position(&self, id: PanelId, rect: Rect) -> Result<(), LayoutError> {
        let in_bounds = rect.w > 0
            && rect.h > 0
            && u32::from(rect.x) + u32::from(rect.w) <= u32::from(self.config.columns)
            && u32::from(rect.y) + u32::from(rect.h) <= u32::from(self.config.rows);
        if !in_bounds {
            return Err(LayoutError::OutOfBounds { id, rect });
        }

        match self.items.iter().find(|other| other.id != id && other.rect.overlaps(&rect)) {
            Some(other) => Err(LayoutError::Overlap { id, rect, other: other.id }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for GridLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.config.rows {
            for col in 0..self.config.columns {
                let glyph = self
                    .items
                    .iter()
                    .find(|item| item.rect.contains(col, row))
                    .map_or('.', |item| item.id.glyph());
                write!(f, "{glyph}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_layout_is_valid() {
        let layout = GridLayout::default();
        layout.validate().unwrap();

        for item in layout.items() {
            assert!(layout.is_valid_position(item.id, item.rect), "{} rejected in place", item.id);
        }
    }

    #[test]
    fn every_template_is_valid() {
        for template in LayoutTemplate::ALL {
            let mut layout = GridLayout::default();
            layout.apply(template);
            assert_eq!(layout.validate(), Ok(()), "{}", template.name());
        }
    }

    #[test]
    fn rejects_overlap_and_out_of_bounds() {
        let layout = GridLayout::default();

        assert!(!layout.is_valid_position(PanelId::Chat, Rect::new(5, 3, 4, 4)));
        assert!(!layout.is_valid_position(PanelId::Chat, Rect::new(10, 4, 4, 4)));
        assert!(!layout.is_valid_position(PanelId::Chat, Rect::new(8, 6, 4, 4)));
        assert!(!layout.is_valid_position(PanelId::Chat, Rect::new(0, 4, 0, 4)));
        // touching edges is fine
        assert!(layout.is_valid_position(PanelId::Chat, Rect::new(0, 4, 4, 4)));
    }

    #[test]
    fn update_enforces_minimum_and_leaves_layout_untouched() {
        let mut layout = GridLayout::default();
        let before = layout.clone();

        let err = layout.update_item(PanelId::Screenshare, Rect::new(6, 0, 3, 3)).unwrap_err();
        assert_eq!(err, LayoutError::BelowMinimum { id: PanelId::Screenshare, min_w: 4, min_h: 3 });

        let err = layout.update_item(PanelId::Chat, Rect::new(4, 2, 4, 4)).unwrap_err();
        assert!(matches!(err, LayoutError::Overlap { other: PanelId::Camera, .. }));
        assert_eq!(layout, before);

        layout.update_item(PanelId::Chat, Rect::new(0, 4, 5, 4)).unwrap();
        assert_eq!(layout.item(PanelId::Chat).unwrap().rect, Rect::new(0, 4, 5, 4));
    }

    #[test]
    fn nearest_position_searches_around_target() {
        let layout = GridLayout::default();

        // exact
        assert_eq!(layout.find_nearest_valid_position(PanelId::Chat, Rect::new(0, 4, 4, 4)), Rect::new(0, 4, 4, 4));
        // one row down from an overlapping drop
        let found = layout.find_nearest_valid_position(PanelId::Chat, Rect::new(2, 3, 4, 4));
        assert!(layout.is_valid_position(PanelId::Chat, found));
        assert_eq!(found, Rect::new(1, 4, 4, 4));
    }

    #[test]
    fn nearest_position_falls_back_to_target_when_nothing_fits() {
        let layout = GridLayout::default();
        let huge = Rect::new(0, 0, 12, 8);

        assert_eq!(layout.find_nearest_valid_position(PanelId::Chat, huge), huge);
    }

    #[test]
    fn unknown_template_is_rejected() {
        let mut layout = GridLayout::default();

        assert_eq!(
            layout.apply_template("cinema"),
            Err(LayoutError::UnknownTemplate { name: "cinema".into() })
        );
        assert_eq!(layout.apply_template("chat_focus"), Ok(LayoutTemplate::ChatFocus));
        assert_eq!(layout.item(PanelId::Chat).unwrap().rect, Rect::new(8, 0, 4, 8));
    }

    #[test]
    fn validate_catches_tampered_layouts() {
        let mut layout = GridLayout::default();
        layout.items[2].rect = Rect::new(4, 2, 4, 4);
        assert!(matches!(layout.validate(), Err(LayoutError::Overlap { .. })));

        let mut layout = GridLayout::default();
        layout.items.pop();
        assert_eq!(layout.validate(), Err(LayoutError::UnknownItem { id: PanelId::Chat }));
    }

    #[test]
    fn renders_default_grid() {
        insta::assert_snapshot!(GridLayout::default().to_string(), @r"
        CCCCCCSSSSSS
        CCCCCCSSSSSS
        CCCCCCSSSSSS
        CCCCCCSSSSSS
        ........MMMM
        ........MMMM
        ........MMMM
        ........MMMM
        ");
    }

    proptest! {
        #[test]
        fn nearest_position_is_valid_or_target(x in 0u16..14, y in 0u16..10, w in 1u16..8, h in 1u16..6) {
            let layout = GridLayout::default();
            let target = Rect::new(x, y, w, h);
            let found = layout.find_nearest_valid_position(PanelId::Chat, target);

            prop_assert!(layout.is_valid_position(PanelId::Chat, found) || found == target);
        }

        #[test]
        fn accepted_updates_preserve_invariants(x in 0u16..12, y in 0u16..8, w in 1u16..12, h in 1u16..8) {
            let mut layout = GridLayout::default();
            if layout.update_item(PanelId::Camera, Rect::new(x, y, w, h)).is_ok() {
                prop_assert_eq!(layout.validate(), Ok(()));
            }
        }
    }
}
