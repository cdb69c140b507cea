//! Organization hierarchy: schools, departments within a school, positions
//! within a department.
//!
//! Pure domain logic (no IO). [`OrgChart`] enforces parent existence,
//! per-parent code uniqueness and child-aware deletion.

pub mod chart;
pub mod units;

pub use chart::OrgChart;
pub use units::{
    Department, DepartmentPatch, NewDepartment, NewPosition, NewSchool, Position, PositionPatch,
    School, SchoolPatch,
};
