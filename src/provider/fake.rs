//! Scripted in-memory provider for tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{CloudProvider, InstanceApi, InstanceRecord, RunState};
use crate::error::{Error, Result};

/// One region's worth of scripted instances
#[derive(Default)]
pub struct FakeRegion {
    name: String,
    instances: Vec<InstanceRecord>,
    list_error: Option<String>,
    stop_error: Option<String>,
    /// Run states returned by successive `instance_state` calls; the last repeats
    states: Mutex<HashMap<String, VecDeque<RunState>>>,
    /// Addresses returned by successive `get_instance` calls; the last repeats
    addresses: Mutex<HashMap<String, VecDeque<Option<String>>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRegion {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn instance(mut self, record: InstanceRecord) -> Self {
        self.instances.push(record);
        self
    }

    pub fn list_error(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }

    pub fn stop_error(mut self, message: &str) -> Self {
        self.stop_error = Some(message.to_string());
        self
    }

    pub fn states(self, id: &str, states: &[RunState]) -> Self {
        self.states
            .lock()
            .unwrap()
            .insert(id.to_string(), states.iter().copied().collect());
        self
    }

    pub fn addresses(self, id: &str, addresses: &[Option<&str>]) -> Self {
        self.addresses.lock().unwrap().insert(
            id.to_string(),
            addresses.iter().map(|a| a.map(str::to_string)).collect(),
        );
        self
    }

    /// Every mutating or polling call made so far, e.g. `stop:web1`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn find(&self, id: &str) -> Result<&InstanceRecord> {
        self.instances.iter().find(|i| i.id == id).ok_or_else(|| Error::Provider {
            action: "GetInstance".to_string(),
            message: format!("no instance {}", id),
        })
    }
}

fn next<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[async_trait]
impl InstanceApi for FakeRegion {
    fn region(&self) -> &str {
        &self.name
    }

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        if let Some(message) = &self.list_error {
            return Err(Error::Provider {
                action: "GetInstances".to_string(),
                message: message.clone(),
            });
        }
        Ok(self.instances.clone())
    }

    async fn get_instance(&self, id: &str) -> Result<InstanceRecord> {
        self.record(format!("get:{}", id));
        let mut record = self.find(id)?.clone();
        if let Some(queue) = self.addresses.lock().unwrap().get_mut(id) {
            record.public_address = next(queue).flatten();
        }
        Ok(record)
    }

    async fn instance_state(&self, id: &str) -> Result<RunState> {
        self.record(format!("state:{}", id));
        let scripted = self.states.lock().unwrap().get_mut(id).and_then(next);
        match scripted {
            Some(state) => Ok(state),
            None => Ok(self.find(id)?.state),
        }
    }

    async fn stop_instance(&self, id: &str, force: bool) -> Result<()> {
        self.record(format!("stop:{}:{}", id, force));
        if let Some(message) = &self.stop_error {
            return Err(Error::Provider {
                action: "StopInstance".to_string(),
                message: message.clone(),
            });
        }
        Ok(())
    }

    async fn start_instance(&self, id: &str) -> Result<()> {
        self.record(format!("start:{}", id));
        Ok(())
    }
}

/// Provider over a fixed set of fake regions
#[derive(Default)]
pub struct FakeProvider {
    regions: Vec<Arc<FakeRegion>>,
    regions_error: Option<String>,
}

impl FakeProvider {
    pub fn new(regions: Vec<Arc<FakeRegion>>) -> Self {
        Self {
            regions,
            regions_error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            regions: Vec::new(),
            regions_error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl CloudProvider for FakeProvider {
    async fn list_regions(&self) -> Result<Vec<String>> {
        if let Some(message) = &self.regions_error {
            return Err(Error::Provider {
                action: "GetRegions".to_string(),
                message: message.clone(),
            });
        }
        Ok(self.regions.iter().map(|r| r.name.clone()).collect())
    }

    fn region(&self, region: &str) -> Arc<dyn InstanceApi> {
        match self.regions.iter().find(|r| r.name == region) {
            Some(r) => Arc::clone(r) as Arc<dyn InstanceApi>,
            None => Arc::new(FakeRegion::new(region)),
        }
    }
}
