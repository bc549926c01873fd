//! On-disk format of a trained two-tower model.
//!
//! The artifact is a single JSON document. Weights are stored row-major;
//! dense layer weights are `out x in`.

use crate::{Activation, DenseLayer, IdSpace, TwoTowerModel};
use gamerec_model::{RecommendError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Shape constraints the caller expects the artifact to satisfy.
///
/// `None` fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelExpectations {
    pub embedding_dim: Option<usize>,
    pub num_users: Option<usize>,
    pub num_items: Option<usize>,
}

/// Serialized model weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Width of both embedding tables
    pub embedding_dim: usize,

    /// External user ids, one per embedding row. Absent = ids are row indices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<u64>>,

    /// External item ids, one per embedding row. Absent = ids are row indices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_ids: Option<Vec<u64>>,

    pub user_embeddings: Vec<Vec<f32>>,

    pub item_embeddings: Vec<Vec<f32>>,

    /// Dense layers applied to the concatenated embeddings
    pub layers: Vec<LayerArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerArtifact {
    pub weight: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub activation: Activation,
}

impl ModelArtifact {
    /// Validate shapes and build the runnable model.
    ///
    /// `source` names the artifact in error messages.
    pub fn into_model(self, source: &str, expect: &ModelExpectations) -> Result<TwoTowerModel> {
        let fail = |reason: String| RecommendError::artifact(source, reason);
        let dim = self.embedding_dim;

        if dim == 0 {
            return Err(fail("embedding_dim must be positive".into()));
        }
        if let Some(expected) = expect.embedding_dim {
            if expected != dim {
                return Err(fail(format!("embedding_dim is {dim}, expected {expected}")));
            }
        }

        let user_embeddings = matrix(self.user_embeddings, dim, "user_embeddings").map_err(&fail)?;
        let item_embeddings = matrix(self.item_embeddings, dim, "item_embeddings").map_err(&fail)?;

        if user_embeddings.nrows() == 0 || item_embeddings.nrows() == 0 {
            return Err(fail("embedding tables must not be empty".into()));
        }
        if let Some(expected) = expect.num_users {
            if expected != user_embeddings.nrows() {
                return Err(fail(format!(
                    "artifact has {} user rows, expected {expected}",
                    user_embeddings.nrows()
                )));
            }
        }
        if let Some(expected) = expect.num_items {
            if expected != item_embeddings.nrows() {
                return Err(fail(format!(
                    "artifact has {} item rows, expected {expected}",
                    item_embeddings.nrows()
                )));
            }
        }

        let users = id_space(self.user_ids, user_embeddings.nrows(), "user_ids").map_err(&fail)?;
        let items = id_space(self.item_ids, item_embeddings.nrows(), "item_ids").map_err(&fail)?;

        if self.layers.is_empty() {
            return Err(fail("model has no layers".into()));
        }

        let mut layers = Vec::with_capacity(self.layers.len());
        let mut width = 2 * dim;
        for (i, layer) in self.layers.into_iter().enumerate() {
            let name = format!("layers[{i}]");
            let weight = matrix(layer.weight, width, &format!("{name}.weight")).map_err(&fail)?;
            if layer.bias.len() != weight.nrows() {
                return Err(fail(format!(
                    "{name}.bias has {} entries, weight has {} outputs",
                    layer.bias.len(),
                    weight.nrows()
                )));
            }
            if layer.bias.iter().any(|v| !v.is_finite()) {
                return Err(fail(format!("{name}.bias contains non-finite values")));
            }
            width = weight.nrows();
            layers.push(DenseLayer {
                weight,
                bias: Array1::from(layer.bias),
                activation: layer.activation,
            });
        }
        if width != 1 {
            return Err(fail(format!("final layer must have 1 output, found {width}")));
        }

        Ok(TwoTowerModel {
            embedding_dim: dim,
            users,
            items,
            user_embeddings,
            item_embeddings,
            layers,
        })
    }
}

/// Pack nested rows into a matrix, checking every row has `cols` finite values.
fn matrix(rows: Vec<Vec<f32>>, cols: usize, name: &str) -> std::result::Result<Array2<f32>, String> {
    let n = rows.len();
    let mut flat = Vec::with_capacity(n * cols);
    for (i, row) in rows.into_iter().enumerate() {
        if row.len() != cols {
            return Err(format!("{name} row {i} has {} columns, expected {cols}", row.len()));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(format!("{name} row {i} contains non-finite values"));
        }
        flat.extend(row);
    }
    Array2::from_shape_vec((n, cols), flat).map_err(|e| format!("{name}: {e}"))
}

fn id_space(ids: Option<Vec<u64>>, rows: usize, name: &str) -> std::result::Result<IdSpace, String> {
    let Some(ids) = ids else {
        return Ok(IdSpace::Dense(rows));
    };
    if ids.len() != rows {
        return Err(format!("{name} has {} entries but there are {rows} embedding rows", ids.len()));
    }
    let mut index = HashMap::with_capacity(ids.len());
    for (row, &id) in ids.iter().enumerate() {
        if index.insert(id, row).is_some() {
            return Err(format!("{name} contains duplicate id {id}"));
        }
    }
    Ok(IdSpace::Mapped { ids, index })
}
