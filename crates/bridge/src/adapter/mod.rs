// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The instance adapter: a closed `{Terminal, Container}` variant
//! exposing one request/response contract regardless of transport.

pub mod container;
pub mod terminal;

use std::time::Duration;

use container::{DaemonContainerAdapter, ExecContainerAdapter, ExecTransport};
use terminal::{DeltaConfig, TerminalAdapter, TmuxPane};

/// Closed two-variant instance adapter. Matches §4.3: exactly one of the
/// terminal/container transports backs any given instance, enforced by
/// the type system rather than a runtime discriminant.
pub enum InstanceAdapter<P: TmuxPane, T: ExecTransport> {
    Terminal(TerminalAdapter<P>),
    ContainerDaemon(DaemonContainerAdapter),
    ContainerExec(ExecContainerAdapter<T>),
}

impl<P: TmuxPane, T: ExecTransport> InstanceAdapter<P, T> {
    pub async fn is_running(&self) -> bool {
        match self {
            Self::Terminal(a) => a.is_running().await,
            Self::ContainerDaemon(a) => a.is_running().await,
            Self::ContainerExec(a) => a.is_running().await,
        }
    }

    pub async fn start(&self) -> bool {
        match self {
            Self::Terminal(a) => a.start().await,
            Self::ContainerDaemon(a) => a.start().await,
            Self::ContainerExec(a) => a.start().await,
        }
    }

    pub async fn send_command_and_wait(&self, text: &str, timeout: Duration) -> (bool, String) {
        match self {
            Self::Terminal(a) => a.send_command_and_wait(text, timeout).await,
            Self::ContainerDaemon(a) => a.send_command_and_wait(text, timeout).await,
            Self::ContainerExec(a) => a.send_command_and_wait(text, timeout).await,
        }
    }

    pub async fn interrupt(&self) -> bool {
        match self {
            Self::Terminal(a) => a.interrupt().await,
            Self::ContainerDaemon(a) => a.interrupt().await,
            Self::ContainerExec(a) => a.interrupt().await,
        }
    }

    pub async fn clear_conversation(&self) -> bool {
        match self {
            Self::Terminal(a) => a.clear_conversation().await,
            Self::ContainerDaemon(a) => a.clear_conversation().await,
            Self::ContainerExec(a) => a.clear_conversation().await,
        }
    }

    pub async fn cleanup(&self) {
        match self {
            Self::Terminal(_) => {}
            Self::ContainerDaemon(a) => a.cleanup().await,
            Self::ContainerExec(_) => {}
        }
    }
}

/// Instance selection: strictly prefer running over stopped instances;
/// among equals, break ties by the configured terminal-vs-container
/// preference, then alphabetically by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantPreference {
    Terminal,
    Container,
}

#[derive(Debug, Clone)]
pub struct SelectionCandidate {
    pub name: String,
    pub running: bool,
    pub is_terminal: bool,
}

pub fn select_instance(candidates: &[SelectionCandidate], preferred: VariantPreference) -> Option<&SelectionCandidate> {
    let mut sorted: Vec<&SelectionCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        b.running.cmp(&a.running).then_with(|| {
            let a_preferred = matches!(
                (preferred, a.is_terminal),
                (VariantPreference::Terminal, true) | (VariantPreference::Container, false)
            );
            let b_preferred = matches!(
                (preferred, b.is_terminal),
                (VariantPreference::Terminal, true) | (VariantPreference::Container, false)
            );
            b_preferred.cmp(&a_preferred).then_with(|| a.name.cmp(&b.name))
        })
    });
    sorted.into_iter().next()
}
