use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

// ─── Scalar aliases ───────────────────────────────────────────

/// Execution (token) identifier.
pub type ExecutionId = Uuid;

/// Process instance identifier.
pub type InstanceId = Uuid;

/// Timer job identifier.
pub type JobId = Uuid;

/// Variable scope, name to JSON value, ordered for deterministic output.
pub type VariableMap = BTreeMap<String, Value>;

// ─── Multi-instance bookkeeping variables ─────────────────────

pub const NR_OF_INSTANCES: &str = "nrOfInstances";
pub const NR_OF_ACTIVE_INSTANCES: &str = "nrOfActiveInstances";
pub const NR_OF_COMPLETED_INSTANCES: &str = "nrOfCompletedInstances";
pub const DEFAULT_ELEMENT_INDEX_VARIABLE: &str = "loopCounter";

/// Variables owned by a multi-instance root. Never copied onto a plain execution.
pub const MULTI_INSTANCE_COUNTERS: [&str; 3] = [
    NR_OF_INSTANCES,
    NR_OF_ACTIVE_INSTANCES,
    NR_OF_COMPLETED_INSTANCES,
];

/// Read a non-negative integer variable, tolerating float and string encodings.
pub fn variable_as_u32(vars: &VariableMap, name: &str) -> Option<u32> {
    vars.get(name).and_then(value_as_u32)
}

pub fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Merge `overlay` on top of `base`; keys in `overlay` win.
pub fn merged(base: &VariableMap, overlay: &VariableMap) -> VariableMap {
    let mut out = base.clone();
    out.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}
