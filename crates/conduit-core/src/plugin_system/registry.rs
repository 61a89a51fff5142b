use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::plugin_system::contribution::Contribution;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::events::{EventBus, ListenerId, PluginEvent, PluginEventData};
use crate::plugin_system::extension_point::ExtensionPoint;
use crate::plugin_system::module::BoxError;

/// Per-point stores plus the ownership map and its reverse index.
///
/// Invariant: an id is in exactly one store iff it has an entry in `owners`,
/// and then it is in exactly one plugin's `plugin_index` set.
#[derive(Debug, Default)]
struct RegistryState {
    stores: HashMap<ExtensionPoint, BTreeMap<String, Contribution>>,
    owners: HashMap<String, String>,
    plugin_index: HashMap<String, BTreeSet<String>>,
}

impl RegistryState {
    fn remove(&mut self, contribution_id: &str) -> Option<Contribution> {
        let owner = self.owners.remove(contribution_id)?;
        if let Some(ids) = self.plugin_index.get_mut(&owner) {
            ids.remove(contribution_id);
            if ids.is_empty() {
                self.plugin_index.remove(&owner);
            }
        }
        let mut removed = None;
        for store in self.stores.values_mut() {
            if let Some(contribution) = store.remove(contribution_id) {
                removed = Some(contribution);
            }
        }
        removed
    }
}

/// Counts reported by [`ContributionRegistry::statistics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatistics {
    pub total_contributions: usize,
    pub total_plugins: usize,
    /// Always carries all 15 extension points.
    pub per_extension_point: BTreeMap<ExtensionPoint, usize>,
}

/// Central store of every contribution, keyed by extension point, with
/// global id ownership.
///
/// All mutation happens inside one write lock, so concurrent registrations
/// of the same id resolve to a single winner.
#[derive(Debug, Default)]
pub struct ContributionRegistry {
    state: RwLock<RegistryState>,
    events: EventBus,
}

impl ContributionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `contribution` under `point` on behalf of `plugin_id`.
    ///
    /// Registering an id the same plugin already owns is a no-op.
    pub fn register(
        &self,
        point: ExtensionPoint,
        contribution: Contribution,
        plugin_id: &str,
    ) -> Result<(), PluginSystemError> {
        let id = contribution.id().to_string();
        if id.trim().is_empty() {
            return Err(PluginSystemError::InvalidContribution {
                plugin_id: plugin_id.to_string(),
                message: format!("{} contribution must have a valid id", point.label()),
            });
        }
        if contribution.extension_point() != point {
            return Err(PluginSystemError::InvalidContribution {
                plugin_id: plugin_id.to_string(),
                message: format!(
                    "Contribution '{}' is a {} contribution and cannot be registered at '{}'",
                    id,
                    contribution.extension_point(),
                    point
                ),
            });
        }

        let mut state = self.write();
        if let Some(owner) = state.owners.get(&id) {
            if owner == plugin_id {
                debug!("Contribution '{}' already registered by '{}'", id, plugin_id);
                return Ok(());
            }
            return Err(PluginSystemError::DuplicateContribution {
                contribution_id: id,
                existing_owner: owner.clone(),
                requested_by: plugin_id.to_string(),
            });
        }

        state.stores.entry(point).or_default().insert(id.clone(), contribution);
        state.owners.insert(id.clone(), plugin_id.to_string());
        state
            .plugin_index
            .entry(plugin_id.to_string())
            .or_default()
            .insert(id.clone());
        debug!("Registered {} '{}' for plugin '{}'", point, id, plugin_id);
        Ok(())
    }

    /// Untyped form of [`register`](Self::register) for callers holding a
    /// point name and a raw JSON record.
    pub fn register_value(
        &self,
        point_name: &str,
        contribution: &Value,
        plugin_id: &str,
    ) -> Result<(), PluginSystemError> {
        let point: ExtensionPoint = point_name.parse()?;
        let invalid = |message: String| PluginSystemError::InvalidContribution {
            plugin_id: plugin_id.to_string(),
            message,
        };
        let Some(record) = contribution.as_object() else {
            return Err(invalid(format!(
                "{} contribution must be an object",
                point.label()
            )));
        };
        match record.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => {}
            _ => {
                return Err(invalid(format!(
                    "{} contribution must have a valid id",
                    point.label()
                )));
            }
        }
        let typed = Contribution::from_value(point, contribution.clone())
            .map_err(|e| invalid(format!("{} contribution is malformed: {}", point.label(), e)))?;
        self.register(point, typed, plugin_id)
    }

    /// Remove one contribution. Ids nobody owns are ignored.
    pub fn unregister(&self, contribution_id: &str, plugin_id: &str) -> Result<(), PluginSystemError> {
        let mut state = self.write();
        match state.owners.get(contribution_id) {
            None => {
                debug!(
                    "Ignoring unregister of unknown contribution '{}' by '{}'",
                    contribution_id, plugin_id
                );
                Ok(())
            }
            Some(owner) if owner != plugin_id => Err(PluginSystemError::OwnershipViolation {
                contribution_id: contribution_id.to_string(),
                owner: owner.clone(),
                requested_by: plugin_id.to_string(),
            }),
            Some(_) => {
                state.remove(contribution_id);
                debug!("Unregistered '{}' for plugin '{}'", contribution_id, plugin_id);
                Ok(())
            }
        }
    }

    /// Remove everything `plugin_id` owns and return how many entries went.
    pub fn unregister_plugin(&self, plugin_id: &str) -> usize {
        let mut state = self.write();
        let Some(ids) = state.plugin_index.remove(plugin_id) else {
            return 0;
        };
        let mut removed = 0;
        for id in &ids {
            if state.remove(id).is_some() {
                removed += 1;
            } else {
                warn!("Ownership index listed '{}' for '{}' but no store held it", id, plugin_id);
            }
        }
        debug!("Unregistered {} contribution(s) of plugin '{}'", removed, plugin_id);
        removed
    }

    pub fn get_contributions(&self, point: ExtensionPoint) -> Vec<Contribution> {
        self.read()
            .stores
            .get(&point)
            .map(|store| store.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Like [`get_contributions`](Self::get_contributions); unknown names yield nothing.
    pub fn get_contributions_by_name(&self, point_name: &str) -> Vec<Contribution> {
        match point_name.parse::<ExtensionPoint>() {
            Ok(point) => self.get_contributions(point),
            Err(_) => Vec::new(),
        }
    }

    pub fn get_contribution(&self, contribution_id: &str) -> Option<Contribution> {
        self.read()
            .stores
            .values()
            .find_map(|store| store.get(contribution_id).cloned())
    }

    pub fn get_plugin_contributions(&self, plugin_id: &str) -> Vec<Contribution> {
        let state = self.read();
        let Some(ids) = state.plugin_index.get(plugin_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| state.stores.values().find_map(|store| store.get(id).cloned()))
            .collect()
    }

    pub fn get_contribution_owner(&self, contribution_id: &str) -> Option<String> {
        self.read().owners.get(contribution_id).cloned()
    }

    pub fn has_contribution(&self, contribution_id: &str) -> bool {
        self.read().owners.contains_key(contribution_id)
    }

    pub fn extension_points(&self) -> &'static [ExtensionPoint] {
        &ExtensionPoint::ALL
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let state = self.read();
        let per_extension_point: BTreeMap<ExtensionPoint, usize> = ExtensionPoint::ALL
            .iter()
            .map(|point| (*point, state.stores.get(point).map_or(0, BTreeMap::len)))
            .collect();
        RegistryStatistics {
            total_contributions: per_extension_point.values().sum(),
            total_plugins: state.plugin_index.len(),
            per_extension_point,
        }
    }

    pub fn add_event_listener<F>(&self, event: PluginEvent, listener: F) -> ListenerId
    where
        F: Fn(&PluginEventData) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.events.add_listener(event, listener)
    }

    pub fn remove_event_listener(&self, event: PluginEvent, id: ListenerId) -> bool {
        self.events.remove_listener(event, id)
    }

    pub fn emit_event(&self, event: PluginEvent, data: PluginEventData) {
        self.events.emit(event, data);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEventData> {
        self.events.subscribe()
    }

    /// Drop every contribution, ownership record and event listener.
    pub fn clear(&self) {
        let mut state = self.write();
        *state = RegistryState::default();
        drop(state);
        self.events.clear();
    }
}
