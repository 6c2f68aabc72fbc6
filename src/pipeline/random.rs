//! Reproducible per-row random streams.
//!
//! Every draw is a pure function of `(base_seed, channel, step, row id,
//! position within the step)`, so draws do not depend on how rows are
//! chunked or ordered, and a run resumed from a checkpoint replays the same
//! numbers for the steps it re-runs.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use rand::distributions::Standard;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Stable 64-bit seed for a name.
pub fn hash_seed(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Checkpointed RNG state.
///
/// Row offsets reset at every step boundary, so between steps the state is
/// just the base seed and the registered channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub base_seed: u64,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone)]
struct Channel {
    seed: u64,
    /// Draws already taken per row in the current step.
    offsets: HashMap<i64, u64>,
}

#[derive(Debug, Clone)]
struct ActiveStep {
    name: String,
    seed: u64,
}

/// Named channels of per-row random streams.
#[derive(Debug, Clone, Default)]
pub struct Random {
    base_seed: u64,
    channels: BTreeMap<String, Channel>,
    step: Option<ActiveStep>,
}

impl Random {
    pub fn new(base_seed: u64) -> Self {
        Self { base_seed, ..Self::default() }
    }

    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    pub fn set_base_seed(&mut self, seed: u64) -> Result<()> {
        if let Some(step) = &self.step {
            return Err(Error::Pipeline(format!(
                "cannot change the base seed during step '{}'",
                step.name
            )));
        }
        self.base_seed = seed;
        Ok(())
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Register a channel (usually named after the table whose rows draw).
    pub fn add_channel(&mut self, name: &str) -> Result<()> {
        if self.channels.contains_key(name) {
            return Err(Error::Pipeline(format!("random channel '{name}' already exists")));
        }
        self.channels.insert(
            name.to_string(),
            Channel { seed: hash_seed(name), offsets: HashMap::new() },
        );
        tracing::debug!(channel = name, "added random channel");
        Ok(())
    }

    pub fn drop_channel(&mut self, name: &str) -> Result<()> {
        self.channels
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("random channel '{name}'")))
    }

    /// Name of the step currently drawing, if any.
    pub fn current_step(&self) -> Option<&str> {
        self.step.as_ref().map(|s| s.name.as_str())
    }

    pub fn begin_step(&mut self, step_name: &str) -> Result<()> {
        if let Some(step) = &self.step {
            return Err(Error::Pipeline(format!(
                "cannot begin step '{step_name}' while step '{}' is active",
                step.name
            )));
        }
        for channel in self.channels.values_mut() {
            channel.offsets.clear();
        }
        self.step = Some(ActiveStep { name: step_name.to_string(), seed: hash_seed(step_name) });
        Ok(())
    }

    pub fn end_step(&mut self, step_name: &str) -> Result<()> {
        match &self.step {
            Some(step) if step.name == step_name => {
                self.step = None;
                for channel in self.channels.values_mut() {
                    channel.offsets.clear();
                }
                Ok(())
            }
            Some(step) => Err(Error::Pipeline(format!(
                "end_step('{step_name}') does not match active step '{}'",
                step.name
            ))),
            None => Err(Error::Pipeline(format!("end_step('{step_name}') with no active step"))),
        }
    }

    /// `n` uniform draws in `[0, 1)` for each row id, row-major
    /// (`ids.len() * n` values).
    pub fn random_for_rows(&mut self, channel: &str, ids: &[i64], n: usize) -> Result<Vec<f64>> {
        let step_seed = match &self.step {
            Some(step) => step.seed,
            None => {
                return Err(Error::Pipeline(format!(
                    "random draws on channel '{channel}' outside of a model step"
                )))
            }
        };
        let base_seed = self.base_seed;
        let ch = self
            .channels
            .get_mut(channel)
            .ok_or_else(|| Error::NotFound(format!("random channel '{channel}'")))?;

        let mut out = Vec::with_capacity(ids.len() * n);
        for id in ids {
            let offset = ch.offsets.entry(*id).or_insert(0);
            let row_seed = base_seed
                .wrapping_add(ch.seed)
                .wrapping_add(step_seed)
                .wrapping_add(*id as u64);
            let mut rng = ChaCha20Rng::seed_from_u64(row_seed);
            for _ in 0..*offset {
                let _: f64 = rng.sample(Standard);
            }
            out.extend((0..n).map(|_| rng.sample::<f64, _>(Standard)));
            *offset += n as u64;
        }
        Ok(out)
    }

    /// One draw for one row.
    pub fn random_for_row(&mut self, channel: &str, id: i64) -> Result<f64> {
        Ok(self.random_for_rows(channel, &[id], 1)?[0])
    }

    pub fn state(&self) -> RngState {
        RngState {
            base_seed: self.base_seed,
            channels: self.channels.keys().cloned().collect(),
        }
    }

    /// Reset to a checkpointed state. Not allowed inside a step.
    pub fn restore(&mut self, state: &RngState) -> Result<()> {
        if let Some(step) = &self.step {
            return Err(Error::Pipeline(format!(
                "cannot restore random state during step '{}'",
                step.name
            )));
        }
        self.base_seed = state.base_seed;
        self.channels = state
            .channels
            .iter()
            .map(|name| (name.clone(), Channel { seed: hash_seed(name), offsets: HashMap::new() }))
            .collect();
        Ok(())
    }
}
