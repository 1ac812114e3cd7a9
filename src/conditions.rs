use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Most recent conditions kept in status; older ones are evicted first
pub const MAX_CONDITIONS: usize = 6;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionType {
    Provisioning,
    Deployed,
    ScalingUp,
    ScalingDown,
    Upgrading,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterconnectCondition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl InterconnectCondition {
    pub fn now(type_: ConditionType, reason: &str) -> Self {
        Self {
            type_,
            transition_time: Some(Time(chrono::Utc::now())),
            reason: reason.to_string(),
        }
    }
}

// A bounded FIFO audit log of provisioning milestones
pub trait ConditionHistory {
    fn conditions(&self) -> &Vec<InterconnectCondition>;
    fn conditions_mut(&mut self) -> &mut Vec<InterconnectCondition>;

    fn append_condition(&mut self, type_: ConditionType, reason: &str) {
        self.push_condition(InterconnectCondition::now(type_, reason));
    }

    fn push_condition(&mut self, condition: InterconnectCondition) {
        let conditions = self.conditions_mut();
        conditions.push(condition);
        if conditions.len() > MAX_CONDITIONS {
            let overflow = conditions.len() - MAX_CONDITIONS;
            conditions.drain(..overflow);
        }
    }

    fn last_condition(&self) -> Option<&InterconnectCondition> {
        self.conditions().last()
    }
}

/// Advisory lifecycle phase; the control state is what exists in the store.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    #[default]
    #[serde(rename = "")]
    None,
    Creating,
    Running,
    Failed,
}

/// What a reconcile pass observed, as far as the phase is concerned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassEvent {
    /// The resource is seen for the first time (no revision stamped yet)
    FirstTouch,
    /// Every step found its resource present and correct
    Converged,
    /// TLS material is required but can never be issued
    Blocked,
    /// A previously blocked spec became satisfiable
    Unblocked,
}

impl Phase {
    pub fn next(self, event: PassEvent) -> Phase {
        match (self, event) {
            (_, PassEvent::Blocked) => Phase::Failed,
            (Phase::None, PassEvent::FirstTouch) => Phase::Creating,
            (Phase::Failed, PassEvent::Unblocked) => Phase::Creating,
            (_, PassEvent::Converged) => Phase::Running,
            (phase, _) => phase,
        }
    }
}
