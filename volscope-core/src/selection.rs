//! Immutable dataset selection chosen by the caller before loading.

use crate::{normalize_path, Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Source of the 2D preview channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DerivedChannel {
    /// One dataset, normalized directly.
    Single(String),
    /// Elementwise numerator / denominator.
    Ratio {
        numerator: String,
        denominator: String,
    },
}

/// Paths picked for one exploration session.
///
/// Built once through [`SelectionBuilder`]; changing the selection means
/// building a new value and reloading everything downstream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Selection {
    primary_volume: Option<String>,
    secondary_volume: Option<String>,
    derived: Option<DerivedChannel>,
    map_x: Option<String>,
    map_y: Option<String>,
    probe_x: Option<String>,
    probe_y: Option<String>,
}

impl Selection {
    /// Starts an empty selection.
    #[must_use]
    pub fn builder() -> SelectionBuilder {
        SelectionBuilder::default()
    }

    #[must_use]
    pub fn primary_volume(&self) -> Option<&str> {
        self.primary_volume.as_deref()
    }

    #[must_use]
    pub fn secondary_volume(&self) -> Option<&str> {
        self.secondary_volume.as_deref()
    }

    #[must_use]
    pub fn derived(&self) -> Option<&DerivedChannel> {
        self.derived.as_ref()
    }

    #[must_use]
    pub fn map_x(&self) -> Option<&str> {
        self.map_x.as_deref()
    }

    #[must_use]
    pub fn map_y(&self) -> Option<&str> {
        self.map_y.as_deref()
    }

    #[must_use]
    pub fn probe_x(&self) -> Option<&str> {
        self.probe_x.as_deref()
    }

    #[must_use]
    pub fn probe_y(&self) -> Option<&str> {
        self.probe_y.as_deref()
    }
}

/// Builder for [`Selection`].
#[derive(Debug, Clone, Default)]
pub struct SelectionBuilder {
    inner: Selection,
}

impl SelectionBuilder {
    #[must_use]
    pub fn primary_volume(mut self, path: &str) -> Self {
        self.inner.primary_volume = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn secondary_volume(mut self, path: &str) -> Self {
        self.inner.secondary_volume = Some(path.to_string());
        self
    }

    /// Uses one dataset as the preview channel.
    #[must_use]
    pub fn single(mut self, path: &str) -> Self {
        self.inner.derived = Some(DerivedChannel::Single(path.to_string()));
        self
    }

    /// Uses `numerator / denominator` as the preview channel.
    #[must_use]
    pub fn ratio(mut self, numerator: &str, denominator: &str) -> Self {
        self.inner.derived = Some(DerivedChannel::Ratio {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        });
        self
    }

    #[must_use]
    pub fn map_coords(mut self, x: Option<&str>, y: Option<&str>) -> Self {
        self.inner.map_x = x.map(str::to_string);
        self.inner.map_y = y.map(str::to_string);
        self
    }

    #[must_use]
    pub fn probe_coords(mut self, x: Option<&str>, y: Option<&str>) -> Self {
        self.inner.probe_x = x.map(str::to_string);
        self.inner.probe_y = y.map(str::to_string);
        self
    }

    /// Validates and freezes the selection. All paths come out normalized.
    ///
    /// # Errors
    /// Returns `InvalidSelection` if a chosen path is blank or a secondary
    /// volume is given without a primary one.
    pub fn build(self) -> Result<Selection> {
        let mut sel = self.inner;

        if sel.secondary_volume.is_some() && sel.primary_volume.is_none() {
            return Err(Error::InvalidSelection(
                "secondary volume requires a primary volume".to_string(),
            ));
        }

        for slot in [
            &mut sel.primary_volume,
            &mut sel.secondary_volume,
            &mut sel.map_x,
            &mut sel.map_y,
            &mut sel.probe_x,
            &mut sel.probe_y,
        ] {
            if let Some(path) = slot.as_mut() {
                *path = checked_path(path)?;
            }
        }

        sel.derived = match sel.derived {
            Some(DerivedChannel::Single(path)) => Some(DerivedChannel::Single(checked_path(&path)?)),
            Some(DerivedChannel::Ratio {
                numerator,
                denominator,
            }) => Some(DerivedChannel::Ratio {
                numerator: checked_path(&numerator)?,
                denominator: checked_path(&denominator)?,
            }),
            None => None,
        };

        Ok(sel)
    }
}

fn checked_path(path: &str) -> Result<String> {
    if path.split('/').all(|part| part.trim().is_empty()) {
        return Err(Error::InvalidSelection(format!(
            "dataset path {path:?} is empty"
        )));
    }
    Ok(normalize_path(path))
}
