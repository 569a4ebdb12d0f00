// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod app_error;
mod config;
mod node;
mod shutdown;
mod tracing_config;

pub use app_error::{GatewayError, GatewayResult};
pub use config::GLOBAL_CONFIG;
pub use config::{global_config, GatewayConfig, GeneralConfig, NetworkConfig, StorageConfig};
pub use node::GatewayNode;
pub use shutdown::{ShutdownListener, ShutdownNotify};
pub use tracing_config::setup_local_tracing;
pub use tracing_config::setup_tracing;
