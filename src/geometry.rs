//! Geometry primitives and the pure intersection predicates used by the
//! query paths. The SQL layer (`sql_functions`) only wraps what is defined
//! here, so everything is testable without a database.

/// Determine whether the two numbers are "approximately equal": the margin
/// of error is the larger of the two magnitudes multiplied by `epsilon`.
pub fn approximately_equal(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() <= a.abs().max(b.abs()) * epsilon
}

/// Determine whether the two numbers are "essentially equal": the margin of
/// error is the smaller of the two magnitudes multiplied by `epsilon`.
pub fn essentially_equal(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() <= a.abs().min(b.abs()) * epsilon
}

/// Whether `a` exceeds `b` by more than the epsilon-scaled margin.
pub fn definitely_greater_than(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b) > a.abs().max(b.abs()) * epsilon
}

/// Whether `a` falls below `b` by more than the epsilon-scaled margin.
pub fn definitely_less_than(a: f64, b: f64, epsilon: f64) -> bool {
    (b - a) > a.abs().max(b.abs()) * epsilon
}

/// A point in the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointD {
    pub x: f64,
    pub y: f64,
}

impl PointD {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A point in 3D space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3dD {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3dD {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A vector in 3D space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector3dD {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3dD {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// An axis-aligned rectangle given by its top-left corner and extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectangleD {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl RectangleD {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Whether the point lies inside the rectangle; all four edges are
    /// part of the rectangle.
    pub fn is_point_inside(&self, point: PointD) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.w
            && point.y >= self.y
            && point.y <= self.y + self.h
    }
}

/// An axis-aligned cuboid given by its corner and extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CuboidD {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
    pub h: f64,
    pub d: f64,
}

impl CuboidD {
    pub fn new(x: f64, y: f64, z: f64, w: f64, h: f64, d: f64) -> Self {
        Self { x, y, z, w, h, d }
    }

    pub fn center(&self) -> Point3dD {
        Point3dD::new(
            self.x + self.w / 2.0,
            self.y + self.h / 2.0,
            self.z + self.d / 2.0,
        )
    }

    /// Intersection test between this cuboid and a plane, by comparing the
    /// distance of the cuboid's center from the plane against the extent of
    /// the cuboid projected onto the plane normal.
    /// See http://www.lighthouse3d.com/tutorials/view-frustum-culling/geometric-approach-testing-boxes-ii/ .
    pub fn intersects_plane(&self, plane: &PlaneNormalAndDistanceD) -> bool {
        let center = self.center();
        let distance_center = plane.normal.x * center.x
            + plane.normal.y * center.y
            + plane.normal.z * center.z
            - plane.distance;
        let projected_extent = plane.normal.x.abs() * self.w
            + plane.normal.y.abs() * self.h
            + plane.normal.z.abs() * self.d;
        2.0 * distance_center.abs() <= projected_extent
    }
}

/// A line segment given by its two endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineThroughTwoPointsD {
    pub a: PointD,
    pub b: PointD,
}

impl LineThroughTwoPointsD {
    pub fn new(a: PointD, b: PointD) -> Self {
        Self { a, b }
    }
}

/// A plane in Hessian normal form: `normal · p = distance`. The normal is
/// expected (but not required) to be of unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneNormalAndDistanceD {
    pub normal: Vector3dD,
    pub distance: f64,
}

impl PlaneNormalAndDistanceD {
    pub fn new(normal: Vector3dD, distance: f64) -> Self {
        Self { normal, distance }
    }
}

/// Classification of a query shape against an R-tree node's bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOverlap {
    NotWithin,
    PartlyWithin,
    FullyWithin,
}

/// Intersection test for the two segments `a1..a2` and `b1..b2` using the
/// 2D parametric formulation. Parallel segments (cross product within
/// machine epsilon) are reported as non-intersecting, so a collinear
/// overlap does not count as an intersection.
pub fn do_lines_intersect(a1: PointD, a2: PointD, b1: PointD, b2: PointD) -> bool {
    let dir_a = PointD::new(a2.x - a1.x, a2.y - a1.y);
    let dir_b = PointD::new(b2.x - b1.x, b2.y - b1.y);

    let cross = dir_a.x * dir_b.y - dir_a.y * dir_b.x;
    if cross.abs() <= f64::EPSILON {
        return false;
    }

    let offset = PointD::new(b1.x - a1.x, b1.y - a1.y);
    let t = (offset.x * dir_b.y - offset.y * dir_b.x) / cross;
    if !(0.0..=1.0).contains(&t) {
        return false;
    }

    let u = (offset.x * dir_a.y - offset.y * dir_a.x) / cross;
    (0.0..=1.0).contains(&u)
}

/// Whether the segment intersects the closed rectangle: true if either
/// endpoint lies inside, or the segment crosses one of the rectangle's
/// diagonals.
pub fn segment_intersects_rect(rect: &RectangleD, line: &LineThroughTwoPointsD) -> bool {
    if rect.is_point_inside(line.a) || rect.is_point_inside(line.b) {
        return true;
    }

    segment_crosses_diagonals(rect, line)
}

/// Classify the segment against the rectangle for R-tree traversal: both
/// endpoints inside means the node is fully within the query shape, one
/// endpoint inside or a diagonal crossing means partly within.
pub fn classify_segment_in_rect(
    rect: &RectangleD,
    line: &LineThroughTwoPointsD,
) -> RegionOverlap {
    let first_inside = rect.is_point_inside(line.a);
    let second_inside = rect.is_point_inside(line.b);
    if first_inside && second_inside {
        return RegionOverlap::FullyWithin;
    }

    if first_inside || second_inside || segment_crosses_diagonals(rect, line) {
        RegionOverlap::PartlyWithin
    } else {
        RegionOverlap::NotWithin
    }
}

fn segment_crosses_diagonals(rect: &RectangleD, line: &LineThroughTwoPointsD) -> bool {
    do_lines_intersect(
        line.a,
        line.b,
        PointD::new(rect.x, rect.y),
        PointD::new(rect.x + rect.w, rect.y + rect.h),
    ) || do_lines_intersect(
        line.a,
        line.b,
        PointD::new(rect.x, rect.y + rect.h),
        PointD::new(rect.x + rect.w, rect.y),
    )
}
