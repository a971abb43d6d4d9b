//! Machine mutating (defaulting) webhook (spec.md §6's "machine defaulter").
//!
//! The upstream `Default()` implementation
//! (`original_source/pkg/api/v1alpha1/machine_webhook.go`) is a no-op scaffold
//! that only logs; no field defaulting has been added upstream. We keep the
//! no-op but still expose the entry point so the mutating webhook chain is
//! complete per spec.md §6.

use tracing::debug;

use crate::api::machine::Machine;

pub fn default(machine: &Machine) {
    debug!(name = %kube::ResourceExt::name_any(machine), "defaulting machine");
}
