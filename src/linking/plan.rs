//! Link steps and their state machine

use crate::config::LinkConfig;
use crate::error::{DeployerError, DeployerResult};

use ethers::types::Address;
use serde::Serialize;
use std::fmt;

/// Address a setter is called with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Resolved through the deployment manifest
    Contract(String),
    /// Used as given
    Address(Address),
}

impl LinkTarget {
    /// A `0x`-prefixed 20-byte hex string is an address, anything else a contract name
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.starts_with("0x") {
            if let Ok(address) = value.parse::<Address>() {
                return LinkTarget::Address(address);
            }
        }
        LinkTarget::Contract(value.to_string())
    }
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Contract(name) => write!(f, "{}", name),
            LinkTarget::Address(address) => write!(f, "{:?}", address),
        }
    }
}

/// `source.setter(target)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStep {
    pub source: String,
    pub setter: String,
    pub target: LinkTarget,
}

impl LinkStep {
    pub fn new(source: &str, setter: &str, target: LinkTarget) -> Self {
        Self {
            source: source.to_string(),
            setter: setter.to_string(),
            target,
        }
    }
}

impl From<&LinkConfig> for LinkStep {
    fn from(config: &LinkConfig) -> Self {
        LinkStep::new(&config.source, &config.method, LinkTarget::parse(&config.target))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl LinkState {
    fn can_become(self, next: LinkState) -> bool {
        matches!(
            (self, next),
            (LinkState::Pending, LinkState::Submitted)
                | (LinkState::Submitted, LinkState::Confirmed)
                | (LinkState::Submitted, LinkState::Failed)
        )
    }
}

/// State of every step in one linking run
#[derive(Debug)]
pub struct LinkProgress {
    labels: Vec<String>,
    states: Vec<LinkState>,
}

impl LinkProgress {
    pub fn new(labels: Vec<String>) -> Self {
        let states = vec![LinkState::Pending; labels.len()];
        Self { labels, states }
    }

    pub fn state(&self, index: usize) -> Option<LinkState> {
        self.states.get(index).copied()
    }

    pub fn label(&self, index: usize) -> &str {
        self.labels.get(index).map(String::as_str).unwrap_or_default()
    }

    /// Move step `index` to `next`, rejecting anything but the forward edges
    pub fn transition(&mut self, index: usize, next: LinkState) -> DeployerResult<()> {
        let current = self.state(index).ok_or_else(|| {
            DeployerError::Config(format!("link step {} does not exist", index))
        })?;

        if !current.can_become(next) {
            return Err(DeployerError::InvalidStateTransition {
                from: format!("{:?}", current),
                to: format!("{:?}", next),
            });
        }
        self.states[index] = next;
        Ok(())
    }

    /// Labels of the steps currently in `state`, in declared order
    pub fn labels_in(&self, state: LinkState) -> Vec<String> {
        self.labels
            .iter()
            .zip(&self.states)
            .filter(|(_, s)| **s == state)
            .map(|(l, _)| l.clone())
            .collect()
    }
}
