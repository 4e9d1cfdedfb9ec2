// Copyright 2026 Daniel Pelikan
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

//! Request id allocation and response matching.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::error::{CloseReason, RpcError};
use super::protocol::{Request, RequestId, Response};

/// Completion callback for a request.
///
/// Invoked exactly once, with the original request and either the matched
/// response or the reason the request was released.
pub type ResponseCallback = Box<dyn FnOnce(Request, Result<Response, RpcError>) + Send + 'static>;

/// What to do with outstanding callbacks when the connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelPolicy {
    /// Complete each callback with `RpcError::Cancelled`.
    #[default]
    Notify,
    /// Discard callbacks without invoking them.
    Drop,
}

struct OutstandingRequest {
    request: Request,
    callback: ResponseCallback,
    created_at: Instant,
}

/// Outcome of dispatching a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Callback invoked.
    Delivered,
    /// Callback invoked and it panicked.
    CallbackPanicked,
    /// No outstanding request with this id.
    Orphan,
}

/// Tracks in-flight requests by id.
pub struct Correlator {
    next_id: RequestId,
    outstanding: HashMap<RequestId, OutstandingRequest>,
    cancel_policy: CancelPolicy,
}

impl Correlator {
    pub fn new(cancel_policy: CancelPolicy) -> Self {
        Self {
            next_id: 1,
            outstanding: HashMap::new(),
            cancel_policy,
        }
    }

    /// Allocate the next id and build the request for it.
    ///
    /// Ids start at 1 and are never handed out twice by one correlator, so
    /// an id cannot collide with one still outstanding.
    pub fn prepare(&mut self, method: impl Into<String>, params: Value) -> Request {
        let id = self.next_id;
        self.next_id += 1;
        Request::new(id, method, params)
    }

    /// Record a request whose frame was written to the link.
    ///
    /// Fire-and-forget requests (no callback) are not tracked.
    pub fn register(&mut self, request: Request, callback: Option<ResponseCallback>) {
        let Some(callback) = callback else {
            debug!("Request {} sent without callback", request.id);
            return;
        };

        let id = request.id;
        let previous = self.outstanding.insert(
            id,
            OutstandingRequest {
                request,
                callback,
                created_at: Instant::now(),
            },
        );
        if previous.is_some() {
            warn!("Replaced outstanding request with duplicate id {}", id);
        }
    }

    /// Deliver a response to its request.
    ///
    /// The entry is removed before the callback runs, so a second response
    /// with the same id is an orphan.
    pub fn dispatch(&mut self, response: Response) -> DispatchOutcome {
        let Some(pending) = self.outstanding.remove(&response.id) else {
            warn!("Orphan response for id {}", response.id);
            return DispatchOutcome::Orphan;
        };

        debug!(
            "Response for request {} ({}) after {:?}",
            response.id,
            pending.request.method,
            pending.created_at.elapsed()
        );

        if invoke(pending.callback, pending.request, Ok(response)) {
            DispatchOutcome::Delivered
        } else {
            DispatchOutcome::CallbackPanicked
        }
    }

    /// Release every outstanding request. Returns how many were released.
    pub fn cancel_all(&mut self, reason: &CloseReason) -> usize {
        let drained: Vec<_> = self.outstanding.drain().collect();
        let count = drained.len();
        if count == 0 {
            return 0;
        }

        match self.cancel_policy {
            CancelPolicy::Notify => {
                info!("Cancelling {} outstanding request(s): {}", count, reason);
                for (_, pending) in drained {
                    invoke(
                        pending.callback,
                        pending.request,
                        Err(RpcError::Cancelled(reason.clone())),
                    );
                }
            }
            CancelPolicy::Drop => {
                info!("Dropping {} outstanding request(s): {}", count, reason);
            }
        }

        count
    }

    /// Fail requests older than `timeout`. Returns the expired ids.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<RequestId> {
        let mut expired: Vec<RequestId> = self
            .outstanding
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.created_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();

        for id in &expired {
            if let Some(pending) = self.outstanding.remove(id) {
                warn!("Request {} ({}) timed out", id, pending.request.method);
                invoke(
                    pending.callback,
                    pending.request,
                    Err(RpcError::TimedOut { id: *id }),
                );
            }
        }

        expired
    }

    #[cfg(test)]
    fn is_outstanding(&self, id: RequestId) -> bool {
        self.outstanding.contains_key(&id)
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}

/// Run a callback, containing any panic. Returns false if it panicked.
fn invoke(
    callback: ResponseCallback,
    request: Request,
    outcome: Result<Response, RpcError>,
) -> bool {
    let id = request.id;
    match catch_unwind(AssertUnwindSafe(move || callback(request, outcome))) {
        Ok(()) => true,
        Err(_) => {
            error!("Callback for request {} panicked", id);
            false
        }
    }
}
