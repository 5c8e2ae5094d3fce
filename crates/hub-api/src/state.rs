use std::sync::Arc;

use hub_runtime::hub::Hub;

/// Shared handler state for the control API.
#[derive(Clone)]
pub struct ApiState {
    pub hub: Arc<Hub>,
}

impl ApiState {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }
}
