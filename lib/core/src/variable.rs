// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Variable declarations and the per-process registry.
//!
//! A variable is identified by name and carries its element type and global
//! shape, fixed for its lifetime once first defined. Every process owns its
//! local declaration; nothing here communicates. Readers additionally learn
//! definitions from admitted steps (see [`crate::engine::Engine`]).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::selection::Selection;

/// A declared variable: name, element type, global shape, and optionally a
/// default local selection used when `put`/`get` is called without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    name: String,
    dtype: DType,
    shape: Vec<usize>,
    local: Option<Selection>,
}

/// Cheap shared handle to a variable declaration.
pub type VariableHandle = Arc<Variable>;

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The default local selection declared with the variable, if any.
    pub fn local_selection(&self) -> Option<&Selection> {
        self.local.as_ref()
    }
}

/// Name -> declaration map for one process.
#[derive(Debug, Default)]
pub struct VariableRegistry {
    vars: HashMap<String, VariableHandle>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a variable, or return the existing handle if an identical
    /// definition is already present. A definition with the same name but a
    /// different dtype, shape, or default selection fails
    /// [`Error::DuplicateDefinition`].
    pub fn define(
        &mut self,
        name: &str,
        dtype: DType,
        shape: Vec<usize>,
        local: Option<Selection>,
    ) -> Result<VariableHandle> {
        if shape.is_empty() {
            return Err(Error::InvalidSelection {
                reason: format!("variable `{name}`: global shape must have rank >= 1"),
            });
        }
        if let Some(d) = shape.iter().position(|&n| n == 0) {
            return Err(Error::InvalidSelection {
                reason: format!("variable `{name}`: global extent is zero in dimension {d}"),
            });
        }
        if let Some(sel) = &local {
            sel.check_within(&shape)?;
        }

        if let Some(existing) = self.vars.get(name) {
            if existing.dtype == dtype && existing.shape == shape && existing.local == local {
                return Ok(existing.clone());
            }
            return Err(Error::DuplicateDefinition { name: name.into() });
        }

        let handle = Arc::new(Variable {
            name: name.into(),
            dtype,
            shape,
            local,
        });
        tracing::debug!(variable = name, dtype = %dtype, "defined variable");
        self.vars.insert(name.into(), handle.clone());
        Ok(handle)
    }

    pub fn lookup(&self, name: &str) -> Option<VariableHandle> {
        self.vars.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
}
