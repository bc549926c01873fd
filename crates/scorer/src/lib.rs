//! Preference scoring for gamerec.
//!
//! Provides the `PreferenceScorer` trait and a two-tower implementation:
//! - user and item embeddings are looked up by id
//! - the pair is concatenated and run through dense layers
//! - the single output unit is the relevance score
//!
//! Weights load from a JSON artifact once per process through `SharedModel`.

mod artifact;

pub use artifact::{LayerArtifact, ModelArtifact, ModelExpectations};

use gamerec_model::{IdKind, ItemId, RecommendError, Result, UserId};
use ndarray::{s, Array1, Array2};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Scores candidate items for a user.
///
/// Implementations must be pure: `&self` only, deterministic for fixed
/// inputs. The returned vector has one score per candidate, in order.
pub trait PreferenceScorer: Send + Sync {
    fn score(&self, user_id: UserId, candidates: &[ItemId]) -> Result<Vec<f32>>;

    /// Scorer name for logging.
    fn name(&self) -> &'static str;
}

impl<T: PreferenceScorer + ?Sized> PreferenceScorer for Arc<T> {
    fn score(&self, user_id: UserId, candidates: &[ItemId]) -> Result<Vec<f32>> {
        (**self).score(user_id, candidates)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Nonlinearity applied after a dense layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Identity,
    Sigmoid,
}

impl Activation {
    fn apply(self, x: &mut Array2<f32>) {
        match self {
            Self::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Self::Identity => {}
            Self::Sigmoid => x.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
        }
    }
}

#[derive(Debug, Clone)]
struct DenseLayer {
    /// out x in
    weight: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

/// Mapping from external ids to embedding rows.
#[derive(Debug, Clone)]
enum IdSpace {
    /// Ids are row indices in `0..len`.
    Dense(usize),
    /// Ids come from a training-time vocabulary.
    Mapped { ids: Vec<u64>, index: HashMap<u64, usize> },
}

impl IdSpace {
    fn row(&self, id: u64) -> Option<usize> {
        match self {
            Self::Dense(len) => usize::try_from(id).ok().filter(|row| row < len),
            Self::Mapped { index, .. } => index.get(&id).copied(),
        }
    }

    fn first_id(&self) -> Option<u64> {
        match self {
            Self::Dense(0) => None,
            Self::Dense(_) => Some(0),
            Self::Mapped { ids, .. } => ids.first().copied(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Dense(len) => *len,
            Self::Mapped { ids, .. } => ids.len(),
        }
    }
}

/// Loader settings.
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub expectations: ModelExpectations,
    /// Artifacts larger than this are rejected without being read
    pub max_artifact_bytes: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            expectations: ModelExpectations::default(),
            max_artifact_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Trained two-tower preference model, read-only after construction.
#[derive(Debug, Clone)]
pub struct TwoTowerModel {
    embedding_dim: usize,
    users: IdSpace,
    items: IdSpace,
    user_embeddings: Array2<f32>,
    item_embeddings: Array2<f32>,
    layers: Vec<DenseLayer>,
}

impl TwoTowerModel {
    /// Load and verify a model artifact from disk.
    pub fn load(path: impl AsRef<Path>, config: &ScorerConfig) -> Result<Self> {
        let path = path.as_ref();
        let source = path.display().to_string();

        let file = File::open(path).map_err(|e| RecommendError::artifact(&source, e))?;
        let size = file
            .metadata()
            .map_err(|e| RecommendError::artifact(&source, e))?
            .len();
        if size > config.max_artifact_bytes {
            return Err(RecommendError::artifact(
                &source,
                format!("artifact is {size} bytes, limit is {}", config.max_artifact_bytes),
            ));
        }

        let reader = BufReader::new(file).take(config.max_artifact_bytes);
        let artifact: ModelArtifact =
            serde_json::from_reader(reader).map_err(|e| RecommendError::artifact(&source, e))?;

        let model = Self::from_artifact(artifact, &source, &config.expectations)?;
        tracing::info!(
            path = %path.display(),
            embedding_dim = model.embedding_dim,
            users = model.num_users(),
            items = model.num_items(),
            layers = model.layers.len(),
            "Loaded two-tower model"
        );
        Ok(model)
    }

    /// Build from an in-memory artifact, validating shapes and verifying
    /// that inference is deterministic.
    pub fn from_artifact(artifact: ModelArtifact, source: &str, expect: &ModelExpectations) -> Result<Self> {
        let model = artifact.into_model(source, expect)?;
        model.verify(source)?;
        Ok(model)
    }

    /// Score a probe pair twice; results must be finite and identical.
    fn verify(&self, source: &str) -> Result<()> {
        let (Some(user), Some(item)) = (self.users.first_id(), self.items.first_id()) else {
            return Err(RecommendError::artifact(source, "model has no embeddings"));
        };
        let first = self.score(user, &[item])?;
        let second = self.score(user, &[item])?;
        if first.iter().any(|v| !v.is_finite()) {
            return Err(RecommendError::artifact(source, "probe score is not finite"));
        }
        if first.iter().map(|v| v.to_bits()).ne(second.iter().map(|v| v.to_bits())) {
            return Err(RecommendError::artifact(source, "inference is not deterministic"));
        }
        Ok(())
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn contains_user(&self, user_id: UserId) -> bool {
        self.users.row(user_id).is_some()
    }

    pub fn contains_item(&self, item_id: ItemId) -> bool {
        self.items.row(item_id).is_some()
    }

    fn forward(&self, mut x: Array2<f32>) -> Array2<f32> {
        for layer in &self.layers {
            x = x.dot(&layer.weight.t()) + &layer.bias;
            layer.activation.apply(&mut x);
        }
        x
    }
}

impl PreferenceScorer for TwoTowerModel {
    fn score(&self, user_id: UserId, candidates: &[ItemId]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Err(RecommendError::EmptyCandidateSet);
        }

        let user_row = self.users.row(user_id).ok_or(RecommendError::OutOfRangeId {
            kind: IdKind::User,
            id: user_id,
        })?;
        let item_rows = candidates
            .iter()
            .map(|&id| {
                self.items
                    .row(id)
                    .ok_or(RecommendError::OutOfRangeId { kind: IdKind::Item, id })
            })
            .collect::<Result<Vec<_>>>()?;

        let dim = self.embedding_dim;
        let user = self.user_embeddings.row(user_row);
        let mut input = Array2::<f32>::zeros((item_rows.len(), 2 * dim));
        for (i, &row) in item_rows.iter().enumerate() {
            input.slice_mut(s![i, ..dim]).assign(&user);
            input.slice_mut(s![i, dim..]).assign(&self.item_embeddings.row(row));
        }

        let output = self.forward(input);
        tracing::debug!(user_id, candidates = candidates.len(), "Scored candidates");
        Ok(output.column(0).to_vec())
    }

    fn name(&self) -> &'static str {
        "two-tower"
    }
}

/// Lazily loaded, process-wide model handle.
///
/// The first `get` loads the artifact under the cell's initialization
/// guard; concurrent first callers block on that one load. A failed load
/// is not cached, so a later call may try again.
#[derive(Debug)]
pub struct SharedModel {
    path: PathBuf,
    config: ScorerConfig,
    cell: OnceCell<Arc<TwoTowerModel>>,
    loads: AtomicUsize,
}

impl SharedModel {
    pub fn new(path: impl Into<PathBuf>, config: ScorerConfig) -> Self {
        Self {
            path: path.into(),
            config,
            cell: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Return the loaded model, loading it on first use.
    pub fn get(&self) -> Result<Arc<TwoTowerModel>> {
        self.cell
            .get_or_try_init(|| {
                self.loads.fetch_add(1, Ordering::SeqCst);
                TwoTowerModel::load(&self.path, &self.config).map(Arc::new)
            })
            .map(Arc::clone)
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Number of load attempts made so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceScorer for SharedModel {
    fn score(&self, user_id: UserId, candidates: &[ItemId]) -> Result<Vec<f32>> {
        self.get()?.score(user_id, candidates)
    }

    fn name(&self) -> &'static str {
        "two-tower"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    /// 2-dim embeddings; score = user . item via a 4 -> 1 identity layer
    /// over the elementwise-aligned halves.
    fn tiny_artifact() -> ModelArtifact {
        ModelArtifact {
            embedding_dim: 2,
            user_ids: None,
            item_ids: None,
            user_embeddings: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            item_embeddings: vec![vec![0.5, 0.1], vec![0.2, 0.9], vec![0.3, 0.3]],
            layers: vec![LayerArtifact {
                weight: vec![vec![1.0, 2.0, 1.0, -1.0]],
                bias: vec![0.5],
                activation: Activation::Identity,
            }],
        }
    }

    fn tiny_model() -> TwoTowerModel {
        TwoTowerModel::from_artifact(tiny_artifact(), "tiny", &ModelExpectations::default()).unwrap()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    fn write_artifact(artifact: &ModelArtifact) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        serde_json::to_writer(&mut file, artifact).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_score_forward_pass() {
        let model = tiny_model();
        // user 0 = [1, 0]: 1*1 + 0*2 + item0 - item1 + 0.5
        let scores = model.score(0, &[0, 1, 2]).unwrap();
        assert_close(&scores, &[1.9, 0.8, 1.5]);
    }

    #[test]
    fn test_score_is_deterministic() {
        let model = tiny_model();
        let a = model.score(1, &[2, 0, 1, 0]).unwrap();
        let b = model.score(1, &[2, 0, 1, 0]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert_close(&a[1..2], &a[3..4]);
    }

    #[test]
    fn test_out_of_range_ids() {
        let model = tiny_model();
        assert_eq!(
            model.score(2, &[0]),
            Err(RecommendError::OutOfRangeId { kind: IdKind::User, id: 2 })
        );
        assert_eq!(
            model.score(0, &[0, 3]),
            Err(RecommendError::OutOfRangeId { kind: IdKind::Item, id: 3 })
        );
    }

    #[test]
    fn test_empty_candidates_fail_fast() {
        assert_eq!(tiny_model().score(0, &[]), Err(RecommendError::EmptyCandidateSet));
    }

    #[test]
    fn test_mapped_id_space() {
        let mut artifact = tiny_artifact();
        artifact.user_ids = Some(vec![76561198120441502, 76561198018875258]);
        artifact.item_ids = Some(vec![10180, 1372110, 751780]);
        let model = TwoTowerModel::from_artifact(artifact, "mapped", &ModelExpectations::default()).unwrap();

        let scores = model.score(76561198120441502, &[10180, 751780]).unwrap();
        assert_close(&scores, &[1.9, 1.5]);
        assert!(matches!(model.score(0, &[10180]), Err(RecommendError::OutOfRangeId { .. })));
        assert!(matches!(
            model.score(76561198120441502, &[0]),
            Err(RecommendError::OutOfRangeId { kind: IdKind::Item, .. })
        ));
    }

    #[test]
    fn test_relu_hidden_layer() {
        let mut artifact = tiny_artifact();
        artifact.layers = vec![
            LayerArtifact {
                weight: vec![vec![1.0, 0.0, 0.0, 0.0], vec![-1.0, 0.0, 0.0, 0.0]],
                bias: vec![0.0, 0.0],
                activation: Activation::Relu,
            },
            LayerArtifact {
                weight: vec![vec![1.0, 1.0]],
                bias: vec![0.0],
                activation: Activation::Sigmoid,
            },
        ];
        let model = TwoTowerModel::from_artifact(artifact, "relu", &ModelExpectations::default()).unwrap();
        // hidden = relu([1, -1]) = [1, 0]; sigmoid(1)
        let score = model.score(0, &[0]).unwrap()[0];
        assert!((score - 0.731_058_6).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_wrong_embedding_width() {
        let mut artifact = tiny_artifact();
        artifact.item_embeddings[1] = vec![0.2, 0.9, 0.4];
        let err = TwoTowerModel::from_artifact(artifact, "bad", &ModelExpectations::default()).unwrap_err();
        match err {
            RecommendError::ArtifactLoad { path, reason } => {
                assert_eq!(path, "bad");
                assert!(reason.contains("item_embeddings row 1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_expectation_mismatch() {
        let expect = ModelExpectations {
            embedding_dim: Some(32),
            ..Default::default()
        };
        assert!(matches!(
            TwoTowerModel::from_artifact(tiny_artifact(), "tiny", &expect),
            Err(RecommendError::ArtifactLoad { .. })
        ));

        let expect = ModelExpectations {
            num_items: Some(3),
            num_users: Some(2),
            embedding_dim: Some(2),
        };
        assert!(TwoTowerModel::from_artifact(tiny_artifact(), "tiny", &expect).is_ok());
    }

    #[test]
    fn test_rejects_bad_layer_chain() {
        let mut artifact = tiny_artifact();
        artifact.layers[0].weight = vec![vec![1.0, 2.0, 1.0, -1.0], vec![0.0; 4]];
        artifact.layers[0].bias = vec![0.0, 0.0];
        let err = TwoTowerModel::from_artifact(artifact, "wide", &ModelExpectations::default()).unwrap_err();
        assert!(err.to_string().contains("final layer must have 1 output"));
    }

    #[test]
    fn test_rejects_duplicate_vocabulary() {
        let mut artifact = tiny_artifact();
        artifact.item_ids = Some(vec![5, 6, 5]);
        assert!(TwoTowerModel::from_artifact(artifact, "dup", &ModelExpectations::default()).is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let file = write_artifact(&tiny_artifact());
        let model = TwoTowerModel::load(file.path(), &ScorerConfig::default()).unwrap();
        assert_eq!(model.num_users(), 2);
        assert_eq!(model.num_items(), 3);
        assert_eq!(model.embedding_dim(), 2);
    }

    #[test]
    fn test_load_respects_size_limit() {
        let file = write_artifact(&tiny_artifact());
        let config = ScorerConfig {
            max_artifact_bytes: 16,
            ..Default::default()
        };
        let err = TwoTowerModel::load(file.path(), &config).unwrap_err();
        assert!(err.to_string().contains("limit is 16"));
    }

    #[test]
    fn test_load_corrupt_artifact() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"embedding_dim\": 2, \"user_embeddings\": [[1.0").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            TwoTowerModel::load(file.path(), &ScorerConfig::default()),
            Err(RecommendError::ArtifactLoad { .. })
        ));
    }

    #[test]
    fn test_shared_model_loads_once() {
        let file = write_artifact(&tiny_artifact());
        let shared = SharedModel::new(file.path(), ScorerConfig::default());
        assert!(!shared.is_loaded());

        let handles: Vec<Arc<TwoTowerModel>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8).map(|_| scope.spawn(|| shared.get().unwrap())).collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(shared.load_count(), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_close(&shared.score(0, &[0]).unwrap(), &[1.9]);
        assert_eq!(shared.load_count(), 1);
    }

    #[test]
    fn test_shared_model_missing_artifact() {
        let shared = SharedModel::new("/nonexistent/model.json", ScorerConfig::default());
        assert!(matches!(shared.get(), Err(RecommendError::ArtifactLoad { .. })));
        assert!(!shared.is_loaded());
    }
}
