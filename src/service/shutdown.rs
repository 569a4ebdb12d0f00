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

use tokio::sync::broadcast;

/// Owning side of the shutdown broadcast. The node keeps one and fans out
/// listeners to the accept loop and every connection handler.
#[derive(Debug, Clone)]
pub struct ShutdownNotify {
    notify: broadcast::Sender<()>,
}

impl ShutdownNotify {
    pub fn new() -> ShutdownNotify {
        let (notify, _) = broadcast::channel(1);
        ShutdownNotify { notify }
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            received: false,
            notify: self.notify.subscribe(),
        }
    }

    pub fn notify(&self) {
        // no receivers is fine, everything already stopped
        let _ = self.notify.send(());
    }
}

impl Default for ShutdownNotify {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side. `recv` latches, and the accept loop checks the latch
/// between connections so a signal that fired while it was busy handing off
/// a socket still stops the next iteration.
#[derive(Debug)]
pub struct ShutdownListener {
    received: bool,
    notify: broadcast::Receiver<()>,
}

impl ShutdownListener {
    pub fn is_received(&self) -> bool {
        self.received
    }

    /// Waits for the shutdown broadcast. Every notifier being dropped
    /// counts as shutdown too, so an early node teardown cannot strand a
    /// listener.
    pub async fn recv(&mut self) {
        if !self.received {
            let _ = self.notify.recv().await;
            self.received = true;
        }
    }
}
