//! Test providers shared by the engine tests.

use crate::provider::{Created, Provider, Removal, UpdateStrategy};
use crate::state::ResourceRecord;
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub label: String,
    #[serde(default)]
    pub fail: bool,
}

impl Step {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.into(),
            fail: false,
        }
    }

    pub fn failing(label: &str) -> Self {
        Self {
            label: label.into(),
            fail: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutputs {
    pub value: String,
}

/// Records every call; `retain` makes deletes inert, `absent` reports labels as already gone.
#[derive(Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    in_place: bool,
    pub retain: bool,
    pub absent: Mutex<BTreeSet<String>>,
}

impl Recorder {
    pub fn in_place() -> Self {
        Self {
            in_place: true,
            ..Self::default()
        }
    }

    pub fn retaining() -> Self {
        Self {
            retain: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Provider for Recorder {
    type Inputs = Step;
    type Outputs = StepOutputs;

    fn resource_type(&self) -> &'static str {
        "test:step"
    }

    fn describe(&self, inputs: &Step) -> String {
        format!("step {}", inputs.label)
    }

    fn create(&self, inputs: &Step) -> Result<Created<StepOutputs>> {
        self.push(format!("create {}", inputs.label));
        if inputs.fail {
            anyhow::bail!("step {} failed", inputs.label);
        }
        Ok(Created::new(
            inputs.label.clone(),
            StepOutputs {
                value: inputs.label.clone(),
            },
        ))
    }

    fn update_strategy(&self, _old: &Step, _new: &Step) -> UpdateStrategy {
        if self.in_place {
            UpdateStrategy::InPlace
        } else {
            UpdateStrategy::Replace
        }
    }

    fn update(
        &self,
        id: &str,
        old: &Step,
        old_outputs: &StepOutputs,
        new: &Step,
    ) -> Result<Created<StepOutputs>> {
        if self.in_place {
            self.push(format!("update {id} -> {}", new.label));
            return Ok(Created::new(
                id,
                StepOutputs {
                    value: new.label.clone(),
                },
            ));
        }
        self.delete(id, old, old_outputs)?;
        self.create(new)
    }

    fn delete(&self, id: &str, _inputs: &Step, _outputs: &StepOutputs) -> Result<Removal> {
        self.push(format!("delete {id}"));
        if self.retain {
            return Ok(Removal::retained("nothing to undo"));
        }
        if self.absent.lock().unwrap().contains(id) {
            return Ok(Removal::AlreadyAbsent);
        }
        Ok(Removal::Removed)
    }
}

/// A record as apply would have written it for `step`.
pub fn record(step: &Step, parent: Option<&str>) -> ResourceRecord {
    let now = Utc::now();
    ResourceRecord {
        resource_type: "test:step".into(),
        id: step.label.clone(),
        inputs: serde_json::to_value(step).unwrap(),
        outputs: serde_json::json!({ "value": step.label }),
        parent: parent.map(str::to_string),
        depends_on: Vec::new(),
        protect: false,
        created_at: now,
        updated_at: now,
    }
}
