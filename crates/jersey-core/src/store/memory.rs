//! In-memory placement store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::{NewPlacement, PlacementPatch, PlacementQuery, PlacementStore, StoreError};
use crate::placement::{Placement, PlacementId, PlacementStatus, Side, sort_by_paint_order};

#[derive(Debug, Default)]
struct Inner {
    placements: HashMap<PlacementId, Placement>,
    next_sequence: u64,
}

/// Thread-safe in-memory [`PlacementStore`].
///
/// A single mutex guards every record, so z assignment and conditional
/// updates are trivially atomic. Used in tests and for ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryPlacementStore {
    inner: Mutex<Inner>,
}

impl InMemoryPlacementStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored placements, in any status.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |inner| inner.placements.len())
    }

    /// Returns `true` if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Backend {
            message: "placement store lock poisoned".to_string(),
        })
    }
}

fn max_z_locked(inner: &Inner, side: Side) -> i64 {
    inner
        .placements
        .values()
        .filter(|p| p.side == side)
        .map(|p| p.z_index)
        .max()
        .unwrap_or(0)
}

impl PlacementStore for InMemoryPlacementStore {
    fn insert(&self, new: NewPlacement) -> Result<Placement, StoreError> {
        let mut inner = self.lock()?;
        inner.next_sequence += 1;
        let placement = Placement {
            id: PlacementId::generate(),
            side: new.side,
            tier: new.tier,
            geometry: new.geometry,
            image: new.image,
            z_index: max_z_locked(&inner, new.side) + 1,
            status: PlacementStatus::Pending,
            live: false,
            created_at: Utc::now(),
            sequence: inner.next_sequence,
            checkout_session_id: None,
            checkout_started_at: None,
            settlement: None,
            cancel_reason: None,
        };
        inner
            .placements
            .insert(placement.id.clone(), placement.clone());
        Ok(placement)
    }

    fn get(&self, id: &PlacementId) -> Result<Option<Placement>, StoreError> {
        Ok(self.lock()?.placements.get(id).cloned())
    }

    fn update(&self, id: &PlacementId, patch: &PlacementPatch) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let placement = inner
            .placements
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                placement_id: id.to_string(),
            })?;
        patch.apply_to(placement);
        Ok(())
    }

    fn compare_and_update(
        &self,
        id: &PlacementId,
        expected: PlacementStatus,
        patch: &PlacementPatch,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.placements.get_mut(id) {
            Some(placement) if placement.status == expected => {
                patch.apply_to(placement);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    fn query(&self, filter: &PlacementQuery) -> Result<Vec<Placement>, StoreError> {
        let inner = self.lock()?;
        let mut out: Vec<Placement> = inner
            .placements
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        sort_by_paint_order(&mut out);
        Ok(out)
    }

    fn max_z(&self, side: Side) -> Result<i64, StoreError> {
        Ok(max_z_locked(&*self.lock()?, side))
    }
}
