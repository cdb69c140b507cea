use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gloria_core::{DepartmentId, DomainError, DomainResult, PositionId, SchoolId};

use crate::units::{
    Department, DepartmentPatch, NewDepartment, NewPosition, NewSchool, Position, PositionPatch,
    School, SchoolPatch, normalize_code, normalize_name,
};

/// The whole organization tree.
///
/// Lists are ordered by code so API output is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgChart {
    schools: BTreeMap<SchoolId, School>,
    departments: BTreeMap<DepartmentId, Department>,
    positions: BTreeMap<PositionId, Position>,
}

impl OrgChart {
    pub fn new() -> Self {
        Self::default()
    }

    // Schools

    pub fn school(&self, id: SchoolId) -> Option<&School> {
        self.schools.get(&id)
    }

    pub fn schools(&self) -> Vec<School> {
        let mut out: Vec<School> = self.schools.values().cloned().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }

    pub fn add_school(&mut self, new: NewSchool, now: DateTime<Utc>) -> DomainResult<School> {
        let code = normalize_code(&new.code)?;
        let name = normalize_name("school name", &new.name)?;
        if self.schools.values().any(|s| s.code == code) {
            return Err(DomainError::conflict(format!("school code {code} already exists")));
        }

        let school = School {
            id: SchoolId::new(),
            code,
            name,
            address: new.address,
            created_at: now,
            updated_at: now,
        };
        self.schools.insert(school.id, school.clone());
        Ok(school)
    }

    pub fn update_school(&mut self, id: SchoolId, patch: SchoolPatch, now: DateTime<Utc>) -> DomainResult<School> {
        let mut school = self
            .schools
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("school {id}")))?;

        if let Some(code) = patch.code {
            let code = normalize_code(&code)?;
            if self.schools.values().any(|s| s.id != id && s.code == code) {
                return Err(DomainError::conflict(format!("school code {code} already exists")));
            }
            school.code = code;
        }
        if let Some(name) = patch.name {
            school.name = normalize_name("school name", &name)?;
        }
        if patch.address.is_some() {
            school.address = patch.address;
        }
        school.updated_at = now;

        self.schools.insert(id, school.clone());
        Ok(school)
    }

    pub fn remove_school(&mut self, id: SchoolId) -> DomainResult<School> {
        if !self.schools.contains_key(&id) {
            return Err(DomainError::not_found(format!("school {id}")));
        }
        if self.departments.values().any(|d| d.school_id == id) {
            return Err(DomainError::conflict("school still has departments"));
        }
        self.schools
            .remove(&id)
            .ok_or_else(|| DomainError::not_found(format!("school {id}")))
    }

    // Departments

    pub fn department(&self, id: DepartmentId) -> Option<&Department> {
        self.departments.get(&id)
    }

    pub fn departments_of(&self, school_id: SchoolId) -> DomainResult<Vec<Department>> {
        if !self.schools.contains_key(&school_id) {
            return Err(DomainError::not_found(format!("school {school_id}")));
        }
        let mut out: Vec<Department> = self
            .departments
            .values()
            .filter(|d| d.school_id == school_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    pub fn add_department(&mut self, new: NewDepartment, now: DateTime<Utc>) -> DomainResult<Department> {
        if !self.schools.contains_key(&new.school_id) {
            return Err(DomainError::not_found(format!("school {}", new.school_id)));
        }
        let code = normalize_code(&new.code)?;
        let name = normalize_name("department name", &new.name)?;
        self.ensure_department_code_free(new.school_id, &code, None)?;

        let department = Department {
            id: DepartmentId::new(),
            school_id: new.school_id,
            code,
            name,
            head_id: new.head_id,
            created_at: now,
            updated_at: now,
        };
        self.departments.insert(department.id, department.clone());
        Ok(department)
    }

    pub fn update_department(
        &mut self,
        id: DepartmentId,
        patch: DepartmentPatch,
        now: DateTime<Utc>,
    ) -> DomainResult<Department> {
        let mut department = self
            .departments
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("department {id}")))?;

        if let Some(code) = patch.code {
            let code = normalize_code(&code)?;
            self.ensure_department_code_free(department.school_id, &code, Some(id))?;
            department.code = code;
        }
        if let Some(name) = patch.name {
            department.name = normalize_name("department name", &name)?;
        }
        if patch.head_id.is_some() {
            department.head_id = patch.head_id;
        }
        department.updated_at = now;

        self.departments.insert(id, department.clone());
        Ok(department)
    }

    pub fn remove_department(&mut self, id: DepartmentId) -> DomainResult<Department> {
        if !self.departments.contains_key(&id) {
            return Err(DomainError::not_found(format!("department {id}")));
        }
        if self.positions.values().any(|p| p.department_id == id) {
            return Err(DomainError::conflict("department still has positions"));
        }
        self.departments
            .remove(&id)
            .ok_or_else(|| DomainError::not_found(format!("department {id}")))
    }

    fn ensure_department_code_free(
        &self,
        school_id: SchoolId,
        code: &str,
        except: Option<DepartmentId>,
    ) -> DomainResult<()> {
        let taken = self
            .departments
            .values()
            .any(|d| d.school_id == school_id && d.code == code && Some(d.id) != except);
        if taken {
            return Err(DomainError::conflict(format!(
                "department code {code} already exists in this school"
            )));
        }
        Ok(())
    }

    // Positions

    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn positions_of(&self, department_id: DepartmentId) -> DomainResult<Vec<Position>> {
        if !self.departments.contains_key(&department_id) {
            return Err(DomainError::not_found(format!("department {department_id}")));
        }
        let mut out: Vec<Position> = self
            .positions
            .values()
            .filter(|p| p.department_id == department_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    pub fn add_position(&mut self, new: NewPosition, now: DateTime<Utc>) -> DomainResult<Position> {
        if !self.departments.contains_key(&new.department_id) {
            return Err(DomainError::not_found(format!("department {}", new.department_id)));
        }
        let code = normalize_code(&new.code)?;
        let title = normalize_name("position title", &new.title)?;
        if new.headcount == 0 {
            return Err(DomainError::validation("headcount must be at least 1"));
        }
        self.ensure_position_code_free(new.department_id, &code, None)?;

        let position = Position {
            id: PositionId::new(),
            department_id: new.department_id,
            code,
            title,
            headcount: new.headcount,
            created_at: now,
            updated_at: now,
        };
        self.positions.insert(position.id, position.clone());
        Ok(position)
    }

    pub fn update_position(
        &mut self,
        id: PositionId,
        patch: PositionPatch,
        now: DateTime<Utc>,
    ) -> DomainResult<Position> {
        let mut position = self
            .positions
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("position {id}")))?;

        if let Some(code) = patch.code {
            let code = normalize_code(&code)?;
            self.ensure_position_code_free(position.department_id, &code, Some(id))?;
            position.code = code;
        }
        if let Some(title) = patch.title {
            position.title = normalize_name("position title", &title)?;
        }
        if let Some(headcount) = patch.headcount {
            if headcount == 0 {
                return Err(DomainError::validation("headcount must be at least 1"));
            }
            position.headcount = headcount;
        }
        position.updated_at = now;

        self.positions.insert(id, position.clone());
        Ok(position)
    }

    pub fn remove_position(&mut self, id: PositionId) -> DomainResult<Position> {
        self.positions
            .remove(&id)
            .ok_or_else(|| DomainError::not_found(format!("position {id}")))
    }

    fn ensure_position_code_free(
        &self,
        department_id: DepartmentId,
        code: &str,
        except: Option<PositionId>,
    ) -> DomainResult<()> {
        let taken = self
            .positions
            .values()
            .any(|p| p.department_id == department_id && p.code == code && Some(p.id) != except);
        if taken {
            return Err(DomainError::conflict(format!(
                "position code {code} already exists in this department"
            )));
        }
        Ok(())
    }

    /// Check that an employee placement is consistent: the department
    /// belongs to the school and the position to the department.
    pub fn validate_placement(
        &self,
        school_id: Option<SchoolId>,
        department_id: Option<DepartmentId>,
        position_id: Option<PositionId>,
    ) -> DomainResult<()> {
        if let Some(id) = school_id {
            if !self.schools.contains_key(&id) {
                return Err(DomainError::not_found(format!("school {id}")));
            }
        }
        if let Some(id) = department_id {
            let department = self
                .departments
                .get(&id)
                .ok_or_else(|| DomainError::not_found(format!("department {id}")))?;
            if school_id.is_some_and(|s| s != department.school_id) {
                return Err(DomainError::validation("department does not belong to the school"));
            }
        }
        if let Some(id) = position_id {
            let position = self
                .positions
                .get(&id)
                .ok_or_else(|| DomainError::not_found(format!("position {id}")))?;
            if department_id.is_some_and(|d| d != position.department_id) {
                return Err(DomainError::validation("position does not belong to the department"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart_with_department() -> (OrgChart, School, Department) {
        let mut chart = OrgChart::new();
        let now = Utc::now();
        let school = chart
            .add_school(
                NewSchool {
                    code: "north".into(),
                    name: "North Campus".into(),
                    address: None,
                },
                now,
            )
            .unwrap();
        let dept = chart
            .add_department(
                NewDepartment {
                    school_id: school.id,
                    code: "math".into(),
                    name: "Mathematics".into(),
                    head_id: None,
                },
                now,
            )
            .unwrap();
        (chart, school, dept)
    }

    #[test]
    fn codes_are_normalized() {
        let (_, school, dept) = chart_with_department();
        assert_eq!(school.code, "NORTH");
        assert_eq!(dept.code, "MATH");
    }

    #[test]
    fn department_under_unknown_school_is_not_found() {
        let mut chart = OrgChart::new();
        let err = chart
            .add_department(
                NewDepartment {
                    school_id: SchoolId::new(),
                    code: "X".into(),
                    name: "X".into(),
                    head_id: None,
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn department_codes_are_unique_per_school_only() {
        let (mut chart, school, _) = chart_with_department();
        let now = Utc::now();

        let dup = chart.add_department(
            NewDepartment {
                school_id: school.id,
                code: "MATH".into(),
                name: "Applied Math".into(),
                head_id: None,
            },
            now,
        );
        assert!(matches!(dup, Err(DomainError::Conflict(_))));

        let south = chart
            .add_school(
                NewSchool {
                    code: "south".into(),
                    name: "South Campus".into(),
                    address: None,
                },
                now,
            )
            .unwrap();
        assert!(
            chart
                .add_department(
                    NewDepartment {
                        school_id: south.id,
                        code: "MATH".into(),
                        name: "Mathematics".into(),
                        head_id: None,
                    },
                    now,
                )
                .is_ok()
        );
    }

    #[test]
    fn cannot_remove_units_with_children() {
        let (mut chart, school, dept) = chart_with_department();
        let now = Utc::now();
        let position = chart
            .add_position(
                NewPosition {
                    department_id: dept.id,
                    code: "lecturer".into(),
                    title: "Lecturer".into(),
                    headcount: 4,
                },
                now,
            )
            .unwrap();

        assert!(matches!(chart.remove_school(school.id), Err(DomainError::Conflict(_))));
        assert!(matches!(chart.remove_department(dept.id), Err(DomainError::Conflict(_))));

        chart.remove_position(position.id).unwrap();
        chart.remove_department(dept.id).unwrap();
        chart.remove_school(school.id).unwrap();
        assert!(chart.schools().is_empty());
    }

    #[test]
    fn rename_to_taken_code_conflicts() {
        let (mut chart, school, _) = chart_with_department();
        let now = Utc::now();
        let other = chart
            .add_department(
                NewDepartment {
                    school_id: school.id,
                    code: "art".into(),
                    name: "Art".into(),
                    head_id: None,
                },
                now,
            )
            .unwrap();

        let err = chart
            .update_department(
                other.id,
                DepartmentPatch {
                    code: Some("math".into()),
                    ..Default::default()
                },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        // Keeping its own code is fine.
        assert!(
            chart
                .update_department(
                    other.id,
                    DepartmentPatch {
                        code: Some("ART".into()),
                        name: Some("Fine Art".into()),
                        ..Default::default()
                    },
                    now,
                )
                .is_ok()
        );
    }

    #[test]
    fn placement_must_be_consistent() {
        let (mut chart, school, dept) = chart_with_department();
        let now = Utc::now();
        let other_school = chart
            .add_school(
                NewSchool {
                    code: "east".into(),
                    name: "East".into(),
                    address: None,
                },
                now,
            )
            .unwrap();

        assert!(chart.validate_placement(Some(school.id), Some(dept.id), None).is_ok());
        assert!(matches!(
            chart.validate_placement(Some(other_school.id), Some(dept.id), None),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            chart.validate_placement(None, None, Some(PositionId::new())),
            Err(DomainError::NotFound(_))
        ));
    }
}
