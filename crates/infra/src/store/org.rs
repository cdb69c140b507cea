use std::sync::RwLock;

use gloria_core::DomainResult;
use gloria_org::OrgChart;

use super::StoreResult;

/// Shared organization chart. Mutations run under the write lock and
/// either apply completely or not at all.
#[derive(Debug, Default)]
pub struct OrgStore {
    chart: RwLock<OrgChart>,
}

impl OrgStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<T>(&self, f: impl FnOnce(&OrgChart) -> T) -> StoreResult<T> {
        let chart = self.chart.read()?;
        Ok(f(&chart))
    }

    pub fn snapshot(&self) -> StoreResult<OrgChart> {
        Ok(self.chart.read()?.clone())
    }

    pub fn restore(&self, chart: OrgChart) -> StoreResult<()> {
        *self.chart.write()? = chart;
        Ok(())
    }

    /// Run `f` against a copy and commit it only on success.
    pub fn write<T>(&self, f: impl FnOnce(&mut OrgChart) -> DomainResult<T>) -> StoreResult<T> {
        let mut chart = self.chart.write()?;
        let mut draft = chart.clone();
        let out = f(&mut draft)?;
        *chart = draft;
        Ok(out)
    }
}
