// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process `StateStore` implementation: two `HashMap`s guarded by a
//! single mutex, so every operation is trivially transactional with
//! respect to every other (§4.3, §5 "the State Store is the
//! transactional choke point").

use crate::{ListStatesFilter, StateStore, StoreError};
use parking_lot::Mutex;
use prepcache_core::{Instance, InstanceId, State, StateId};
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<StateId, State>,
    instances: HashMap<InstanceId, Instance>,
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn get_state(&self, id: StateId) -> Option<State> {
        self.inner.lock().states.get(&id).cloned()
    }

    fn list_states(&self, filter: &ListStatesFilter) -> Vec<State> {
        self.inner
            .lock()
            .states
            .values()
            .filter(|s| filter.parent_id.is_none() || s.parent_state_id == filter.parent_id)
            .cloned()
            .collect()
    }

    fn create_state(&self, state: State) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.states.contains_key(&state.state_id) {
            return Err(StoreError::StateAlreadyExists(state.state_id.to_string()));
        }
        inner.states.insert(state.state_id, state);
        Ok(())
    }

    fn delete_state(&self, id: StateId) -> Result<Option<State>, StoreError> {
        Ok(self.inner.lock().states.remove(&id))
    }

    fn incref_state(&self, id: StateId) -> Option<State> {
        let mut inner = self.inner.lock();
        let state = inner.states.get_mut(&id)?;
        state.ref_count += 1;
        Some(state.clone())
    }

    fn decref_state(&self, id: StateId, now: &str) -> Option<State> {
        let mut inner = self.inner.lock();
        let state = inner.states.get_mut(&id)?;
        state.ref_count = state.ref_count.saturating_sub(1);
        state.last_used_at = now.to_string();
        Some(state.clone())
    }

    fn set_state_size_bytes(&self, id: StateId, size_bytes: u64) -> Option<State> {
        let mut inner = self.inner.lock();
        let state = inner.states.get_mut(&id)?;
        state.size_bytes = Some(size_bytes);
        Some(state.clone())
    }

    fn get_instance(&self, id: InstanceId) -> Option<Instance> {
        self.inner.lock().instances.get(&id).cloned()
    }

    fn create_instance(&self, instance: Instance) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.instances.contains_key(&instance.instance_id) {
            return Err(StoreError::InstanceAlreadyExists(instance.instance_id.to_string()));
        }
        inner.instances.insert(instance.instance_id, instance);
        Ok(())
    }

    fn delete_instance(&self, id: InstanceId) -> Result<Option<Instance>, StoreError> {
        Ok(self.inner.lock().instances.remove(&id))
    }

    fn list_instances(&self) -> Vec<Instance> {
        self.inner.lock().instances.values().cloned().collect()
    }
}
