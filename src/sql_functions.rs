//! Registration of the custom geometric predicates with SQLite.
//!
//! Three callables are installed on every connection: two R-tree query
//! functions (`LineThroughPoints2d` on 4-coordinate trees,
//! `PlaneNormalDistance3d` on 6-coordinate trees) and the scalar
//! `IntersectsWithLine` used on the non-spatial-index fallback path. The
//! geometric work is done by the pure predicates in [`crate::geometry`];
//! this module only adapts them to the SQLite calling conventions.
//!
//! rusqlite has no safe wrapper for `sqlite3_rtree_query_callback`, so the
//! two R-tree functions go through `rusqlite::ffi` directly.

use crate::error::{Result, TileDocError};
use crate::geometry::{
    CuboidD, LineThroughTwoPointsD, PlaneNormalAndDistanceD, PointD, RectangleD, RegionOverlap,
    Vector3dD, classify_segment_in_rect, segment_intersects_rect,
};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, ffi};
use std::ffi::CStr;
use std::os::raw::c_int;
use std::ptr;
use std::slice;

/// R-tree query function testing node boxes against a 2D line segment.
pub const FN_RTREE_LINE_SEGMENT_2D: &str = "LineThroughPoints2d";
/// R-tree query function testing node boxes against a 3D plane.
pub const FN_RTREE_PLANE_AABB_3D: &str = "PlaneNormalDistance3d";
/// Scalar segment/rectangle intersection predicate.
pub const FN_SCALAR_INTERSECTS_WITH_LINE: &str = "IntersectsWithLine";

const FN_RTREE_LINE_SEGMENT_2D_C: &CStr = c"LineThroughPoints2d";
const FN_RTREE_PLANE_AABB_3D_C: &CStr = c"PlaneNormalDistance3d";

// visibility values of sqlite3_rtree_query_info.eWithin
const NOT_WITHIN: c_int = 0;
const PARTLY_WITHIN: c_int = 1;
const FULLY_WITHIN: c_int = 2;

/// Register all custom geometric predicates on the provided connection.
///
/// Example:
/// ```no_run
/// use rusqlite::Connection;
/// use tiledoc::register_geometry_functions;
///
/// let conn = Connection::open_in_memory()?;
/// register_geometry_functions(&conn)?;
/// # Ok::<(), tiledoc::TileDocError>(())
/// ```
pub fn register_geometry_functions(conn: &Connection) -> Result<()> {
    register_rtree_query(conn, FN_RTREE_LINE_SEGMENT_2D_C, line_segment_2d_query)?;
    register_rtree_query(conn, FN_RTREE_PLANE_AABB_3D_C, plane_aabb_3d_query)?;
    register_intersects_with_line(conn)?;
    Ok(())
}

type RtreeQueryCallback = unsafe extern "C" fn(*mut ffi::sqlite3_rtree_query_info) -> c_int;

fn register_rtree_query(
    conn: &Connection,
    name: &'static CStr,
    callback: RtreeQueryCallback,
) -> Result<()> {
    let return_code = unsafe {
        ffi::sqlite3_rtree_query_callback(
            conn.handle(),
            name.as_ptr(),
            Some(callback),
            ptr::null_mut(),
            None,
        )
    };
    if return_code != ffi::SQLITE_OK {
        return Err(TileDocError::Sql(rusqlite::Error::SqliteFailure(
            ffi::Error::new(return_code),
            Some(format!(
                "error registering '{}'",
                name.to_string_lossy()
            )),
        )));
    }

    Ok(())
}

pub(crate) fn register_intersects_with_line(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        FN_SCALAR_INTERSECTS_WITH_LINE,
        8,
        FunctionFlags::SQLITE_UTF8
            | FunctionFlags::SQLITE_DETERMINISTIC
            | FunctionFlags::SQLITE_DIRECTONLY,
        |ctx| {
            let rect = RectangleD::new(
                ctx.get::<f64>(0)?,
                ctx.get::<f64>(1)?,
                ctx.get::<f64>(2)?,
                ctx.get::<f64>(3)?,
            );
            let line = LineThroughTwoPointsD::new(
                PointD::new(ctx.get::<f64>(4)?, ctx.get::<f64>(5)?),
                PointD::new(ctx.get::<f64>(6)?, ctx.get::<f64>(7)?),
            );
            Ok(i64::from(segment_intersects_rect(&rect, &line)))
        },
    )?;
    Ok(())
}

/// This query callback is for 2-dimensional r-trees: `aCoord` carries
/// min/max pairs for x and y, the four parameters are the segment
/// endpoints. Wrong coordinate or parameter counts are signaled as errors.
unsafe extern "C" fn line_segment_2d_query(
    info_ptr: *mut ffi::sqlite3_rtree_query_info,
) -> c_int {
    let info = unsafe { &mut *info_ptr };
    if info.nCoord != 4 || info.nParam != 4 {
        return ffi::SQLITE_ERROR;
    }

    let params = unsafe { slice::from_raw_parts(info.aParam, 4) };
    let coords = unsafe { slice::from_raw_parts(info.aCoord, 4) };

    let line = LineThroughTwoPointsD::new(
        PointD::new(params[0], params[1]),
        PointD::new(params[2], params[3]),
    );
    let node_box = RectangleD::new(
        coords[0],
        coords[2],
        coords[1] - coords[0],
        coords[3] - coords[2],
    );

    info.eWithin = match classify_segment_in_rect(&node_box, &line) {
        RegionOverlap::FullyWithin => FULLY_WITHIN,
        RegionOverlap::PartlyWithin => PARTLY_WITHIN,
        RegionOverlap::NotWithin => NOT_WITHIN,
    };
    info.rScore = f64::from(info.iLevel);
    ffi::SQLITE_OK
}

/// This query callback is for 3-dimensional r-trees: `aCoord` carries
/// min/max pairs for x, y and z, the four parameters are the plane normal
/// and its distance from the origin.
unsafe extern "C" fn plane_aabb_3d_query(
    info_ptr: *mut ffi::sqlite3_rtree_query_info,
) -> c_int {
    let info = unsafe { &mut *info_ptr };
    if info.nCoord != 6 || info.nParam != 4 {
        return ffi::SQLITE_ERROR;
    }

    let params = unsafe { slice::from_raw_parts(info.aParam, 4) };
    let coords = unsafe { slice::from_raw_parts(info.aCoord, 6) };

    let plane = PlaneNormalAndDistanceD::new(
        Vector3dD::new(params[0], params[1], params[2]),
        params[3],
    );
    let node_box = CuboidD::new(
        coords[0],
        coords[2],
        coords[4],
        coords[1] - coords[0],
        coords[3] - coords[2],
        coords[5] - coords[4],
    );

    info.eWithin = if node_box.intersects_plane(&plane) {
        PARTLY_WITHIN
    } else {
        NOT_WITHIN
    };
    info.rScore = f64::from(info.iLevel);
    ffi::SQLITE_OK
}
