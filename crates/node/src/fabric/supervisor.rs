// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervision: restart budgets, blast-radius domains, escalation.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Crash budget: at most `limit` crashes within `window`, then escalate.
#[derive(Debug)]
pub struct RestartBudget {
    limit: u32,
    window: Duration,
    crashes: VecDeque<Instant>,
}

impl RestartBudget {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window, crashes: VecDeque::new() }
    }

    /// Three crashes in sixty seconds.
    pub fn standard() -> Self {
        Self::new(3, Duration::from_secs(60))
    }

    /// Record a crash. Returns false when this crash reaches the budget
    /// limit: the caller must stop restarting and escalate.
    pub fn record(&mut self, now: Instant) -> bool {
        while self.crashes.front().is_some_and(|t| now.duration_since(*t) > self.window) {
            self.crashes.pop_front();
        }
        self.crashes.push_back(now);
        self.crashes.len() < self.limit as usize
    }
}

/// How a domain reacts when one child crashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart only the crashed child.
    OneForOne,
    /// Restart the crashed child and every child declared after it.
    RestForOne,
    /// Restart every child in the domain.
    AllForOne,
}

type ChildFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type ChildFactory = Box<dyn FnMut(CancellationToken) -> ChildFuture + Send>;

/// A supervised child: a name and a factory that builds its run future.
pub struct ChildSpec {
    pub name: String,
    factory: ChildFactory,
}

impl ChildSpec {
    pub fn new<F, Fut>(name: impl Into<String>, mut factory: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self { name: name.into(), factory: Box::new(move |token| Box::pin(factory(token))) }
    }

    /// A child that cannot be rebuilt in place (it owns channel receivers).
    /// Its first crash escalates straight to the domain.
    pub fn once<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut slot = Some(factory);
        Self::new(name, move |token| {
            let taken = slot.take();
            async move {
                match taken {
                    Some(factory) => factory(token).await,
                    None => anyhow::bail!("worker owns its channels and cannot restart in place"),
                }
            }
        })
    }
}

/// One blast-radius domain: an ordered set of children under one policy.
///
/// A child crash within budget triggers the policy; past the budget the
/// whole domain shuts down and the escalation message is sent upward.
pub struct Domain {
    name: &'static str,
    policy: RestartPolicy,
    children: Vec<ChildSpec>,
}

struct RunningChild {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Domain {
    pub fn new(name: &'static str, policy: RestartPolicy) -> Self {
        Self { name, policy, children: Vec::new() }
    }

    pub fn child(mut self, spec: ChildSpec) -> Self {
        self.children.push(spec);
        self
    }

    /// Run the domain until shutdown or escalation. On escalation the domain
    /// name is sent on `escalation_tx` after all children stop.
    pub fn spawn(
        mut self,
        shutdown: CancellationToken,
        escalation_tx: mpsc::Sender<&'static str>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (crash_tx, mut crash_rx) = mpsc::channel::<usize>(self.children.len().max(1));
            let mut running: Vec<RunningChild> = Vec::with_capacity(self.children.len());
            let mut budgets: Vec<RestartBudget> =
                self.children.iter().map(|_| RestartBudget::standard()).collect();

            for index in 0..self.children.len() {
                running.push(start_child(&mut self.children[index], index, &shutdown, &crash_tx));
            }
            info!(domain = self.name, children = self.children.len(), "domain started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    crashed = crash_rx.recv() => {
                        let Some(index) = crashed else { break };
                        if !budgets[index].record(Instant::now()) {
                            error!(
                                domain = self.name,
                                child = %self.children[index].name,
                                "restart budget exhausted, escalating"
                            );
                            break_all(&mut running).await;
                            let _ = escalation_tx.send(self.name).await;
                            return;
                        }
                        // Jitter so a correlated crash does not restart the
                        // whole fleet in lockstep.
                        tokio::time::sleep(Duration::from_millis(rand::random_range(20..120))).await;
                        let to_restart: Vec<usize> = match self.policy {
                            RestartPolicy::OneForOne => vec![index],
                            RestartPolicy::RestForOne => (index..self.children.len()).collect(),
                            RestartPolicy::AllForOne => (0..self.children.len()).collect(),
                        };
                        for i in to_restart {
                            let old = std::mem::replace(
                                &mut running[i],
                                start_child(&mut self.children[i], i, &shutdown, &crash_tx),
                            );
                            old.cancel.cancel();
                            old.handle.abort();
                            warn!(domain = self.name, child = %self.children[i].name, "child restarted");
                        }
                    }
                }
            }

            break_all(&mut running).await;
            info!(domain = self.name, "domain stopped");
        })
    }
}

fn start_child(
    spec: &mut ChildSpec,
    index: usize,
    shutdown: &CancellationToken,
    crash_tx: &mpsc::Sender<usize>,
) -> RunningChild {
    let cancel = shutdown.child_token();
    let future = (spec.factory)(cancel.clone());
    let name = spec.name.clone();
    let crash_tx = crash_tx.clone();
    let child_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        match future.await {
            Ok(()) => {}
            Err(e) => {
                if !child_cancel.is_cancelled() {
                    warn!(child = %name, err = %e, "worker crashed");
                    let _ = crash_tx.send(index).await;
                }
            }
        }
    });
    RunningChild { cancel, handle }
}

async fn break_all(running: &mut Vec<RunningChild>) {
    for child in running.iter() {
        child.cancel.cancel();
    }
    // Graceful drain budget before forced termination.
    for child in running.drain(..) {
        if tokio::time::timeout(Duration::from_secs(5), child.handle).await.is_err() {
            // Forced: the task is detached past its drain budget.
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
