//! Auto-fill chain resolution.
//!
//! After a request with an [`AutoFillSpec`] succeeds, its outcome is held back
//! while the spec's children run through the same queue. The parent is
//! delivered once every child is terminal: with the children's replies in
//! [`Reply::filled`](crate::Reply::filled) and, when the spec has a merge
//! step, with their bodies folded into the parent body; or failed with
//! [`ApiError::AutoFillChildFailed`] wrapping the first mandatory failure.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use smol_str::SmolStr;
use tilbud_core::{ApiError, AutoFillSpec, Request};
use tokio::runtime::Handle;
use tracing::{Instrument, debug, info_span, warn};

use super::Inner;
use super::handle::RequestHandle;
use super::registry::{Lineage, Ticket};
use crate::completion::{Completion, Pending, Reply};

impl Inner {
    /// Resolves the chain of `ticket` in the background, then delivers it.
    pub(crate) fn spawn_chain(self: &Arc<Self>, ticket: Ticket, reply: Reply, spec: AutoFillSpec) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(
                seq = ticket.handle.seq(),
                "no runtime to resolve auto-fill on, delivering unfilled"
            );
            self.deliver(ticket, Completion::Delivered(reply));
            return;
        };

        let inner = Arc::clone(self);
        let span = info_span!("tilbud.autofill", seq = ticket.handle.seq(), spec = spec.name());
        self.tasks.spawn_on(
            async move {
                let completion = inner
                    .resolve_chain(
                        ticket.handle.clone(),
                        ticket.request.clone(),
                        ticket.lineage.clone(),
                        reply,
                        &spec,
                    )
                    .await;
                inner.deliver(ticket, completion);
            }
            .instrument(span),
            &runtime,
        );
    }

    async fn resolve_chain(
        self: &Arc<Self>,
        parent: RequestHandle,
        request: Request,
        lineage: Lineage,
        mut reply: Reply,
        spec: &AutoFillSpec,
    ) -> Completion {
        let Ok(mut value) = reply.response.json_value() else {
            debug!("parent body is not JSON, nothing to fill");
            return Completion::Delivered(reply);
        };
        if !spec.applies(&value) {
            return Completion::Delivered(reply);
        }
        let children = spec.children(&value);
        if children.is_empty() {
            return Completion::Delivered(reply);
        }
        if lineage.depth >= self.config.max_autofill_depth {
            warn!(
                depth = lineage.depth,
                "auto-fill depth limit reached, delivering unfilled"
            );
            return Completion::Delivered(reply);
        }

        let lineage = lineage.child(request.cache_key(), parent.cancel_token());
        let tag = request.tag().map(SmolStr::new);
        let mut handles = Vec::with_capacity(children.len());
        let mut pending = FuturesUnordered::new();

        for child in children {
            let mandatory = child.is_mandatory();
            let mut child_request = child.into_request().resolve(&self.config.base_url);
            let key = child_request.cache_key();
            if lineage.contains(&key) {
                debug!(key = %key, "child repeats a request up the chain, skipping");
                continue;
            }
            if let Some(tag) = &tag
                && child_request.tag().is_none()
            {
                child_request = child_request.with_tag(tag.clone());
            }

            let (listener, completion) = Pending::channel();
            let index = handles.len();
            handles.push(self.submit(child_request, Box::new(listener), lineage.clone()));
            pending.push(async move { (index, mandatory, completion.await) });
        }
        debug!(children = handles.len(), "waiting for auto-fill children");

        let mut filled: Vec<Option<Reply>> = vec![None; handles.len()];
        let mut failure: Option<ApiError> = None;
        loop {
            tokio::select! {
                biased;
                _ = parent.cancel_token().cancelled() => {
                    // Child tokens are already cancelled.
                    for handle in &handles {
                        self.withdraw(handle);
                    }
                    return Completion::Cancelled;
                }
                next = pending.next() => {
                    let Some((index, mandatory, completion)) = next else {
                        break;
                    };
                    match completion {
                        Completion::Delivered(child) => filled[index] = Some(child),
                        Completion::Failed(err) if mandatory => {
                            failure.get_or_insert(err);
                        }
                        Completion::Failed(err) => {
                            debug!(error = %err, "optional auto-fill child failed");
                        }
                        Completion::Cancelled if mandatory => {
                            failure.get_or_insert(ApiError::Cancelled);
                        }
                        Completion::Cancelled => {}
                    }
                }
            }
        }

        if let Some(source) = failure {
            return Completion::Failed(ApiError::AutoFillChildFailed {
                source: Box::new(source),
            });
        }
        reply.filled = filled.into_iter().flatten().collect();
        if spec.merges() {
            let bodies: Vec<Value> = reply
                .filled
                .iter()
                .filter_map(|child| child.response.json_value().ok())
                .collect();
            spec.merge(&mut value, &bodies);
            match serde_json::to_vec(&value) {
                Ok(body) => reply.response = Arc::new(reply.response.with_body(body)),
                Err(err) => warn!(error = %err, "merged body not encodable, delivering as received"),
            }
        }
        Completion::Delivered(reply)
    }
}
