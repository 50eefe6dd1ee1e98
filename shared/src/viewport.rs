use crate::options::TileLayerOptions;
use crate::projection::Point;
use crate::tile::TileCoords;

/// Viewport manages the pan/zoom transformation from world coordinates (map pixels at
/// the most detailed zoom) to screen coordinates. Zoom is discrete, one level per
/// power of two.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    pub offset_x: f64,
    pub offset_y: f64,
    pub zoom: i32,
    pub width: f64,
    pub height: f64,
    min_zoom: i32,
    max_zoom: i32,
}

impl Viewport {
    pub fn new(options: &TileLayerOptions, width: f64, height: f64) -> Self {
        Self {
            offset_x: width / 2.0,
            offset_y: height / 2.0,
            zoom: options.min_zoom,
            width,
            height,
            min_zoom: options.min_zoom,
            max_zoom: options.max_zoom,
        }
    }

    /// Screen pixels per world unit at the current zoom.
    pub fn scale(&self) -> f64 {
        2f64.powi(self.zoom - self.max_zoom)
    }

    pub fn world_to_screen(&self, world: Point) -> Point {
        let scale = self.scale();
        Point::new(
            world.x * scale + self.offset_x,
            world.y * scale + self.offset_y,
        )
    }

    pub fn screen_to_world(&self, screen: Point) -> Point {
        let scale = self.scale();
        Point::new(
            (screen.x - self.offset_x) / scale,
            (screen.y - self.offset_y) / scale,
        )
    }

    /// Pan by screen-space delta.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.offset_x += dx;
        self.offset_y += dy;
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    /// Step the zoom level toward a focus point (screen coordinates), keeping the
    /// world point under it fixed. Returns whether the zoom level changed.
    pub fn zoom_at(&mut self, levels: i32, screen_x: f64, screen_y: f64) -> bool {
        let new_zoom = (self.zoom + levels).clamp(self.min_zoom, self.max_zoom);
        if new_zoom == self.zoom {
            return false;
        }
        let ratio = 2f64.powi(new_zoom - self.zoom);

        // Adjust offset so the point under the cursor stays fixed
        self.offset_x = screen_x - (screen_x - self.offset_x) * ratio;
        self.offset_y = screen_y - (screen_y - self.offset_y) * ratio;
        self.zoom = new_zoom;
        true
    }

    /// Center the view on a world point without changing zoom.
    pub fn center_on(&mut self, world: Point) {
        let scale = self.scale();
        self.offset_x = self.width / 2.0 - world.x * scale;
        self.offset_y = self.height / 2.0 - world.y * scale;
    }

    /// Tiles overlapping the visible area at the current zoom.
    pub fn tile_range(&self, tile_size: u32) -> TileRange {
        let size = f64::from(tile_size.max(1));
        let left = -self.offset_x;
        let top = -self.offset_y;
        TileRange {
            z: self.zoom,
            min_x: (left / size).floor() as i32,
            min_y: (top / size).floor() as i32,
            max_x: ((left + self.width) / size).ceil() as i32 - 1,
            max_y: ((top + self.height) / size).ceil() as i32 - 1,
        }
    }
}

/// Inclusive rectangle of tile positions at one display zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub z: i32,
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl TileRange {
    pub fn contains(&self, coords: TileCoords) -> bool {
        coords.z == self.z
            && (self.min_x..=self.max_x).contains(&coords.x)
            && (self.min_y..=self.max_y).contains(&coords.y)
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Row-major iteration over every tile in the range.
    pub fn iter(&self) -> impl Iterator<Item = TileCoords> + '_ {
        (self.min_y..=self.max_y).flat_map(move |y| {
            (self.min_x..=self.max_x).map(move |x| TileCoords::new(x, y, self.z))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        Viewport::new(&TileLayerOptions::default(), 250.0, 200.0)
    }

    #[test]
    fn screen_world_round_trip_at_min_zoom() {
        let vp = viewport();
        assert_eq!(vp.scale(), 1.0 / 32.0);
        let world = Point::new(3200.0, -640.0);
        let screen = vp.world_to_screen(world);
        assert_eq!(screen, Point::new(225.0, 80.0));
        assert_eq!(vp.screen_to_world(screen), world);
    }

    #[test]
    fn zoom_at_keeps_focus_fixed_and_clamps() {
        let mut vp = viewport();
        let focus = Point::new(40.0, 60.0);
        let before = vp.screen_to_world(focus);
        assert!(vp.zoom_at(2, focus.x, focus.y));
        assert_eq!(vp.zoom, 3);
        assert_eq!(vp.screen_to_world(focus), before);

        assert!(vp.zoom_at(10, focus.x, focus.y));
        assert_eq!(vp.zoom, 6);
        assert!(!vp.zoom_at(1, focus.x, focus.y));
    }

    #[test]
    fn tile_range_covers_visible_area() {
        let mut vp = viewport();
        vp.offset_x = 0.0;
        vp.offset_y = 0.0;
        let range = vp.tile_range(100);
        assert_eq!(
            range,
            TileRange {
                z: 1,
                min_x: 0,
                min_y: 0,
                max_x: 2,
                max_y: 1
            }
        );
        assert_eq!(range.iter().count(), 6);

        vp.pan(-50.0, 10.0);
        let range = vp.tile_range(100);
        assert_eq!((range.min_x, range.max_x), (0, 2));
        assert_eq!((range.min_y, range.max_y), (-1, 1));
        assert!(range.contains(TileCoords::new(2, -1, 1)));
        assert!(!range.contains(TileCoords::new(2, -1, 2)));
    }

    #[test]
    fn center_on_puts_world_point_mid_screen() {
        let mut vp = viewport();
        vp.zoom_at(5, 0.0, 0.0);
        vp.center_on(Point::new(1000.0, -500.0));
        assert_eq!(
            vp.world_to_screen(Point::new(1000.0, -500.0)),
            Point::new(125.0, 100.0)
        );
    }
}
