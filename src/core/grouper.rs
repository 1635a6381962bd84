//! End-to-end grouping pipeline.
//!
//! [`PhotoGrouper::run`] drives every enabled stage in a fixed order
//! (similar, screenshot, selfie, blurry, large video, duplicate, then best
//! shot selection) and splits the `[0, 1)` progress interval evenly between
//! them. Each stage reports only inside its own slice. Assets are processed
//! in batches of `batch_size`, with up to `max_concurrent_operations` batches
//! in flight; the blur stage takes both numbers from the blur detector's
//! preset instead. The cancellation token is read before each window of
//! batches.
//!
//! Measurements fetched from the extractor are memoized for the duration of
//! one call, so a photo that is both clustered and deduplicated in a run is
//! extracted once. Nothing is kept between calls. When a cache is attached,
//! blur and face results are read from it before asking the extractor and
//! fresh results are written back when the call succeeds.

use crate::core::blur::{BlurDetectionConfig, BlurDetectionResult, BlurDetector};
use crate::core::face::{FaceDetectionResult, FaceDetector};
use crate::core::lsh::LshHasher;
use crate::core::models::{
    AssetDescriptor, AssetId, FeatureVector, GroupType, GroupingOptions, PhotoGroup,
};
use crate::core::quality::BestShotSelector;
use crate::core::union_find::CandidateGrouper;
use crate::database::cache::{AnalysisCacheManager, PhotoAnalysisResult};
use crate::error::{AnalysisError, AnalysisResult};
use crate::services::extractor::FeatureExtractor;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub type ProgressFn = dyn Fn(f64) + Send + Sync;

/// Half-open slice `[start, end)` of the overall progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressRange {
    pub start: f64,
    pub end: f64,
}

impl ProgressRange {
    pub fn new(start: f64, end: f64) -> Self {
        let start = start.clamp(0.0, 1.0);
        Self {
            start,
            end: end.clamp(start, 1.0),
        }
    }

    pub fn full() -> Self {
        Self::new(0.0, 1.0)
    }

    /// Splits the range into `parts` equal, adjacent slices.
    pub fn split(&self, parts: usize) -> Vec<ProgressRange> {
        if parts == 0 {
            return Vec::new();
        }
        let width = (self.end - self.start) / parts as f64;
        (0..parts)
            .map(|i| {
                let start = self.start + width * i as f64;
                let end = if i + 1 == parts {
                    self.end
                } else {
                    start + width
                };
                ProgressRange { start, end }
            })
            .collect()
    }

    fn at(&self, fraction: f64) -> f64 {
        self.start + (self.end - self.start) * fraction.clamp(0.0, 1.0)
    }
}

struct StageProgress<'a> {
    callback: Option<&'a ProgressFn>,
    range: Option<ProgressRange>,
}

impl<'a> StageProgress<'a> {
    fn new(callback: Option<&'a ProgressFn>, range: Option<ProgressRange>) -> Self {
        Self { callback, range }
    }

    /// Reports `done` of `total` items. Never reaches `range.end`.
    fn report(&self, done: usize, total: usize) {
        let (Some(callback), Some(range)) = (self.callback, self.range) else {
            return;
        };
        if total == 0 || done >= total {
            return;
        }
        let value = range.at(done as f64 / total as f64);
        if value >= range.start && value < range.end {
            callback(value);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStage {
    Similar,
    Screenshots,
    Selfies,
    Blurry,
    LargeVideos,
    Duplicates,
    BestShot,
}

impl From<GroupType> for GroupingStage {
    fn from(group_type: GroupType) -> Self {
        match group_type {
            GroupType::Similar => GroupingStage::Similar,
            GroupType::Screenshot => GroupingStage::Screenshots,
            GroupType::Selfie => GroupingStage::Selfies,
            GroupType::Blurry => GroupingStage::Blurry,
            GroupType::LargeVideo => GroupingStage::LargeVideos,
            GroupType::Duplicate => GroupingStage::Duplicates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingState {
    Idle,
    Running(GroupingStage),
    Completed,
    Cancelled,
    Failed(String),
}

/// Shared cancel flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn as_flag(&self) -> &AtomicBool {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupingSummary {
    pub total_assets: usize,
    pub group_count: usize,
    pub grouped_photo_count: usize,
    pub groups_per_type: Vec<(GroupType, usize)>,
    pub reclaimable_bytes: i64,
}

impl GroupingSummary {
    pub fn from_groups(total_assets: usize, groups: &[PhotoGroup]) -> Self {
        let groups_per_type = GroupType::ALL
            .iter()
            .map(|&t| (t, groups.iter().filter(|g| g.group_type == t).count()))
            .filter(|&(_, count)| count > 0)
            .collect();
        let grouped: HashSet<&AssetId> = groups.iter().flat_map(|g| g.photo_ids.iter()).collect();

        Self {
            total_assets,
            group_count: groups.len(),
            grouped_photo_count: grouped.len(),
            groups_per_type,
            reclaimable_bytes: groups.iter().map(PhotoGroup::reclaimable_size).sum(),
        }
    }
}

#[derive(Default)]
struct Measurements {
    features: HashMap<AssetId, FeatureVector>,
    blur: HashMap<AssetId, BlurDetectionResult>,
    faces: HashMap<AssetId, FaceDetectionResult>,
    cache_checked: HashSet<AssetId>,
    fresh: HashSet<AssetId>,
}

/// Measurements gathered by one public call, dropped when it returns.
#[derive(Default)]
struct RunMemo(Mutex<Measurements>);

impl RunMemo {
    fn lock(&self) -> AnalysisResult<MutexGuard<'_, Measurements>> {
        self.0
            .lock()
            .map_err(|_| AnalysisError::grouping_failed("analysis memo lock poisoned"))
    }
}

/// How a stage slices its items into concurrent batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchPlan {
    batch_size: usize,
    max_concurrent: usize,
}

impl From<&GroupingOptions> for BatchPlan {
    fn from(options: &GroupingOptions) -> Self {
        Self {
            batch_size: options.batch_size.max(1),
            max_concurrent: options.max_concurrent_operations.max(1),
        }
    }
}

impl From<&BlurDetectionConfig> for BatchPlan {
    fn from(config: &BlurDetectionConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_concurrent: config.max_concurrent_operations.max(1),
        }
    }
}

pub struct PhotoGrouper {
    extractor: Arc<dyn FeatureExtractor>,
    blur_detector: BlurDetector,
    face_detector: FaceDetector,
    selector: BestShotSelector,
    cache: Option<Arc<AnalysisCacheManager>>,
    cancellation_token: CancellationToken,
    state: RwLock<GroupingState>,
}

impl PhotoGrouper {
    pub fn new(extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self {
            extractor,
            blur_detector: BlurDetector::default(),
            face_detector: FaceDetector::default(),
            selector: BestShotSelector::default(),
            cache: None,
            cancellation_token: CancellationToken::new(),
            state: RwLock::new(GroupingState::Idle),
        }
    }

    pub fn with_blur_detector(mut self, detector: BlurDetector) -> Self {
        self.blur_detector = detector;
        self
    }

    pub fn with_face_detector(mut self, detector: FaceDetector) -> Self {
        self.face_detector = detector;
        self
    }

    pub fn with_selector(mut self, selector: BestShotSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_cache(mut self, cache: Arc<AnalysisCacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn state(&self) -> GroupingState {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_state(&self, state: GroupingState) {
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    fn check_cancelled(&self) -> AnalysisResult<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        Ok(())
    }

    /// Runs every enabled stage and returns the groups in stage order.
    ///
    /// Empty input returns no groups and emits no progress. On success the
    /// last progress value is exactly 1.0. Cancellation yields
    /// [`AnalysisError::Cancelled`], never a partial result.
    pub async fn run(
        &self,
        assets: &[AssetDescriptor],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        if assets.is_empty() {
            self.set_state(GroupingState::Completed);
            return Ok(Vec::new());
        }

        let options = options.validated();
        let memo = RunMemo::default();

        let outcome = self.run_stages(&memo, assets, &options, progress).await;
        match &outcome {
            Ok(groups) => {
                self.set_state(GroupingState::Completed);
                log::info!(
                    "Grouping finished: {} groups from {} assets",
                    groups.len(),
                    assets.len()
                );
            }
            Err(AnalysisError::Cancelled) => {
                self.set_state(GroupingState::Cancelled);
                log::info!("Grouping cancelled");
            }
            Err(e) => {
                self.set_state(GroupingState::Failed(e.to_string()));
                log::error!("Grouping failed: {}", e);
            }
        }
        outcome
    }

    pub async fn run_with_summary(
        &self,
        assets: &[AssetDescriptor],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
    ) -> AnalysisResult<(Vec<PhotoGroup>, GroupingSummary)> {
        let groups = self.run(assets, options, progress).await?;
        let summary = GroupingSummary::from_groups(assets.len(), &groups);
        Ok((groups, summary))
    }

    async fn run_stages(
        &self,
        memo: &RunMemo,
        assets: &[AssetDescriptor],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        self.check_cancelled()?;

        let enabled: Vec<GroupType> = GroupType::ALL
            .into_iter()
            .filter(|&t| options.is_enabled(t))
            .collect();
        let stage_count = enabled.len() + usize::from(options.auto_select_best_shot);
        let ranges = ProgressRange::full().split(stage_count);

        let mut groups = Vec::new();
        for (group_type, range) in enabled.iter().zip(ranges.iter()) {
            self.set_state(GroupingState::Running((*group_type).into()));
            log::debug!("Starting {} stage", group_type);
            let range = Some(*range);
            let stage_groups = match group_type {
                GroupType::Similar => {
                    self.similar_stage(memo, assets, options, progress, range).await?
                }
                GroupType::Screenshot => {
                    self.group_screenshots(assets, options, progress, range).await?
                }
                GroupType::Selfie => {
                    self.selfie_stage(memo, assets, options, progress, range).await?
                }
                GroupType::Blurry => self.blurry_stage(memo, assets, progress, range).await?,
                GroupType::LargeVideo => {
                    self.group_large_videos(assets, options, progress, range).await?
                }
                GroupType::Duplicate => {
                    self.duplicate_stage(memo, assets, options, progress, range).await?
                }
            };
            groups.extend(stage_groups);
        }

        if options.auto_select_best_shot {
            self.set_state(GroupingState::Running(GroupingStage::BestShot));
            let range = ranges.last().copied();
            self.select_best_shots(memo, assets, &mut groups, options, progress, range)
                .await?;
        }

        self.check_cancelled()?;
        self.persist_fresh_results(memo);

        if let Some(callback) = progress {
            callback(1.0);
        }
        Ok(groups)
    }

    /// Processes `items` in windows of concurrent batches, returning each
    /// successful result paired with its asset in input order. Failed items
    /// are logged and skipped; cancellation aborts the whole stage.
    async fn run_batches<'a, T, F, Fut>(
        &self,
        items: &[&'a AssetDescriptor],
        plan: BatchPlan,
        progress: &StageProgress<'_>,
        work: F,
    ) -> AnalysisResult<Vec<(&'a AssetDescriptor, T)>>
    where
        F: Fn(&'a AssetDescriptor) -> Fut,
        Fut: Future<Output = AnalysisResult<T>>,
    {
        let total = items.len();
        let batches: Vec<&[&'a AssetDescriptor]> = items.chunks(plan.batch_size).collect();
        let work = &work;

        let mut done = 0;
        let mut results = Vec::with_capacity(total);
        for window in batches.chunks(plan.max_concurrent) {
            self.check_cancelled()?;
            progress.report(done, total);

            let window_results = join_all(window.iter().map(|batch| async move {
                let mut batch_results = Vec::with_capacity(batch.len());
                for &asset in batch.iter() {
                    batch_results.push((asset, work(asset).await));
                }
                batch_results
            }))
            .await;

            for (asset, result) in window_results.into_iter().flatten() {
                match result {
                    Ok(value) => results.push((asset, value)),
                    Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
                    Err(e) => log::warn!("Skipping {}: {}", asset.id, e),
                }
            }
            done += window.iter().map(|b| b.len()).sum::<usize>();
        }

        Ok(results)
    }

    pub async fn group_similar_photos(
        &self,
        assets: &[AssetDescriptor],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        let options = options.validated();
        self.similar_stage(&RunMemo::default(), assets, &options, progress, range).await
    }

    async fn similar_stage(
        &self,
        memo: &RunMemo,
        assets: &[AssetDescriptor],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        let progress = StageProgress::new(progress, range);
        let photos: Vec<&AssetDescriptor> = assets.iter().filter(|a| a.is_photo()).collect();

        let extracted = self
            .run_batches(&photos, options.into(), &progress, |asset| {
                self.feature_vector(memo, asset)
            })
            .await?;
        self.check_cancelled()?;
        if extracted.len() < 2 {
            return Ok(Vec::new());
        }

        let sizes = file_sizes(assets);
        let items: Vec<(AssetId, FeatureVector)> = extracted
            .into_iter()
            .map(|(asset, vector)| (asset.id.clone(), vector))
            .collect();
        let vectors: Vec<&[f32]> = items.iter().map(|(_, v)| v.as_slice()).collect();

        let hasher = LshHasher::new(options.lsh_bits, options.lsh_seed);
        let pairs = hasher.multi_probe_index_pairs(&vectors, options.lsh_tables);
        let clusters =
            CandidateGrouper::new(options.similarity_threshold, options.minimum_group_size)
                .group(&items, &pairs);

        log::debug!(
            "{} candidate pairs produced {} similar groups",
            pairs.len(),
            clusters.len()
        );

        clusters
            .into_iter()
            .map(|cluster| build_group(GroupType::Similar, cluster.photo_ids, &sizes))
            .collect()
    }

    pub async fn group_screenshots(
        &self,
        assets: &[AssetDescriptor],
        _options: &GroupingOptions,
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        self.check_cancelled()?;
        StageProgress::new(progress, range).report(0, assets.len());

        let ids: Vec<AssetId> = assets
            .iter()
            .filter(|a| a.is_screenshot)
            .map(|a| a.id.clone())
            .collect();
        single_group(GroupType::Screenshot, ids, &file_sizes(assets))
    }

    /// Uses the store's selfie hint when present and falls back to face
    /// detection otherwise.
    pub async fn group_selfies(
        &self,
        assets: &[AssetDescriptor],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        let options = options.validated();
        let memo = RunMemo::default();
        let groups = self.selfie_stage(&memo, assets, &options, progress, range).await?;
        self.persist_fresh_results(&memo);
        Ok(groups)
    }

    async fn selfie_stage(
        &self,
        memo: &RunMemo,
        assets: &[AssetDescriptor],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        let progress = StageProgress::new(progress, range);
        let photos: Vec<&AssetDescriptor> = assets
            .iter()
            .filter(|a| a.is_photo() && !a.is_screenshot)
            .collect();

        let classified = self
            .run_batches(&photos, options.into(), &progress, |asset| {
                self.selfie_status(memo, asset)
            })
            .await?;

        let ids = classified
            .into_iter()
            .filter(|(_, is_selfie)| *is_selfie)
            .map(|(asset, _)| asset.id.clone())
            .collect();
        single_group(GroupType::Selfie, ids, &file_sizes(assets))
    }

    /// Batches by the blur detector's preset rather than by `options`.
    pub async fn group_blurry_photos(
        &self,
        assets: &[AssetDescriptor],
        _options: &GroupingOptions,
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        let memo = RunMemo::default();
        let groups = self.blurry_stage(&memo, assets, progress, range).await?;
        self.persist_fresh_results(&memo);
        Ok(groups)
    }

    async fn blurry_stage(
        &self,
        memo: &RunMemo,
        assets: &[AssetDescriptor],
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        let progress = StageProgress::new(progress, range);
        let photos: Vec<&AssetDescriptor> = assets.iter().filter(|a| a.is_photo()).collect();
        let plan = BatchPlan::from(self.blur_detector.config());

        let detections = self
            .run_batches(&photos, plan, &progress, |asset| {
                self.blur_result(memo, &asset.id)
            })
            .await?;

        let ids = detections
            .into_iter()
            .filter(|(_, blur)| blur.is_blurry)
            .map(|(asset, _)| asset.id.clone())
            .collect();
        single_group(GroupType::Blurry, ids, &file_sizes(assets))
    }

    pub async fn group_large_videos(
        &self,
        assets: &[AssetDescriptor],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        self.check_cancelled()?;
        StageProgress::new(progress, range).report(0, assets.len());

        let ids: Vec<AssetId> = assets
            .iter()
            .filter(|a| a.is_video() && a.file_size > options.large_video_threshold)
            .map(|a| a.id.clone())
            .collect();
        single_group(GroupType::LargeVideo, ids, &file_sizes(assets))
    }

    /// Photos whose full-width hash collides. With 64 bits this only
    /// catches identical or near-identical embeddings.
    pub async fn group_duplicates(
        &self,
        assets: &[AssetDescriptor],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        let options = options.validated();
        self.duplicate_stage(&RunMemo::default(), assets, &options, progress, range).await
    }

    async fn duplicate_stage(
        &self,
        memo: &RunMemo,
        assets: &[AssetDescriptor],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<Vec<PhotoGroup>> {
        let progress = StageProgress::new(progress, range);
        let photos: Vec<&AssetDescriptor> = assets.iter().filter(|a| a.is_photo()).collect();

        let extracted = self
            .run_batches(&photos, options.into(), &progress, |asset| {
                self.feature_vector(memo, asset)
            })
            .await?;
        self.check_cancelled()?;

        let vectors: Vec<&[f32]> = extracted.iter().map(|(_, v)| v.as_slice()).collect();
        let hasher = LshHasher::new(options.duplicate_hash_bits, options.lsh_seed);
        let sizes = file_sizes(assets);

        hasher
            .bucket_indices(&vectors)
            .into_iter()
            .map(|bucket| {
                let ids = bucket.into_iter().map(|i| extracted[i].0.id.clone()).collect();
                build_group(GroupType::Duplicate, ids, &sizes)
            })
            .collect()
    }

    /// Fills in `best_shot_index` for every group. Photo groups are ranked by
    /// quality and a group whose members cannot all be scored keeps `None`.
    /// Large-video groups carry no photo measurements and keep their
    /// smallest file.
    async fn select_best_shots(
        &self,
        memo: &RunMemo,
        assets: &[AssetDescriptor],
        groups: &mut [PhotoGroup],
        options: &GroupingOptions,
        progress: Option<&ProgressFn>,
        range: Option<ProgressRange>,
    ) -> AnalysisResult<()> {
        let progress = StageProgress::new(progress, range);

        let needed: HashSet<&AssetId> = groups
            .iter()
            .filter(|g| g.group_type != GroupType::LargeVideo && g.len() > 1)
            .flat_map(|g| g.photo_ids.iter())
            .collect();
        let mut seen = HashSet::new();
        let to_score: Vec<&AssetDescriptor> = assets
            .iter()
            .filter(|a| needed.contains(&a.id) && seen.insert(a.id.as_str()))
            .collect();

        self.run_batches(&to_score, options.into(), &progress, |asset| {
            self.scoring_inputs(memo, asset)
        })
        .await?;
        self.check_cancelled()?;

        let measured = memo.lock()?;
        for group in groups.iter_mut() {
            let selection = if group.group_type == GroupType::LargeVideo {
                let sizes = &group.file_sizes;
                self.selector.select_by(&group.photo_ids, |i, _| {
                    Ok(-(sizes.get(i).copied().unwrap_or(0) as f64))
                })
            } else {
                self.selector.select_best_shot(&group.photo_ids, |scorer, id| {
                    let blur = measured.blur.get(id).ok_or_else(|| AnalysisError::Extraction {
                        asset_id: id.clone(),
                        message: "no sharpness data".to_string(),
                    })?;
                    Ok(scorer.score(blur, measured.faces.get(id)))
                })
            };
            match selection {
                Ok(index) => group.set_best_shot(index)?,
                Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
                Err(e) => log::warn!("No best shot for {} group: {}", group.group_type, e),
            }
        }
        Ok(())
    }

    async fn feature_vector(
        &self,
        memo: &RunMemo,
        asset: &AssetDescriptor,
    ) -> AnalysisResult<FeatureVector> {
        let memoized = memo.lock()?.features.get(&asset.id).cloned();
        if let Some(vector) = memoized {
            return Ok(vector);
        }
        let vector = self.extractor.extract(&asset.id).await?;
        memo.lock()?
            .features
            .insert(asset.id.clone(), vector.clone());
        Ok(vector)
    }

    async fn selfie_status(&self, memo: &RunMemo, asset: &AssetDescriptor) -> AnalysisResult<bool> {
        match asset.is_selfie {
            Some(hint) => Ok(hint),
            None => Ok(self.face_result(memo, &asset.id).await?.is_selfie),
        }
    }

    async fn scoring_inputs(&self, memo: &RunMemo, asset: &AssetDescriptor) -> AnalysisResult<()> {
        self.blur_result(memo, &asset.id).await?;
        self.face_result(memo, &asset.id).await?;
        Ok(())
    }

    async fn blur_result(
        &self,
        memo: &RunMemo,
        photo_id: &AssetId,
    ) -> AnalysisResult<BlurDetectionResult> {
        self.load_cached(memo, photo_id)?;
        let memoized = memo.lock()?.blur.get(photo_id).cloned();
        if let Some(result) = memoized {
            return Ok(result);
        }

        let metric = self.extractor.sharpness_metric(photo_id).await?;
        let result = self.blur_detector.detect_blur(metric, photo_id)?;
        let mut measured = memo.lock()?;
        measured.blur.insert(photo_id.clone(), result.clone());
        measured.fresh.insert(photo_id.clone());
        Ok(result)
    }

    async fn face_result(
        &self,
        memo: &RunMemo,
        photo_id: &AssetId,
    ) -> AnalysisResult<FaceDetectionResult> {
        self.load_cached(memo, photo_id)?;
        let memoized = memo.lock()?.faces.get(photo_id).cloned();
        if let Some(result) = memoized {
            return Ok(result);
        }

        let faces = self.extractor.faces(photo_id).await?;
        let result = self.face_detector.analyze(photo_id, faces);
        let mut measured = memo.lock()?;
        measured.faces.insert(photo_id.clone(), result.clone());
        measured.fresh.insert(photo_id.clone());
        Ok(result)
    }

    /// Seeds the memo from the cache the first time a photo is touched.
    /// Cache failures only cost a recomputation.
    fn load_cached(&self, memo: &RunMemo, photo_id: &AssetId) -> AnalysisResult<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        if !memo.lock()?.cache_checked.insert(photo_id.clone()) {
            return Ok(());
        }

        match cache.load(photo_id) {
            Ok(Some(entry)) => {
                let mut measured = memo.lock()?;
                if let Some(blur) = entry.blur {
                    measured.blur.entry(photo_id.clone()).or_insert(blur);
                }
                if let Some(faces) = entry.faces {
                    measured.faces.entry(photo_id.clone()).or_insert(faces);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Cache read failed for {}: {}", photo_id, e),
        }
        Ok(())
    }

    fn persist_fresh_results(&self, memo: &RunMemo) {
        let Some(cache) = &self.cache else {
            return;
        };
        let entries: Vec<PhotoAnalysisResult> = match memo.lock() {
            Ok(memo) => {
                let mut ids: Vec<&AssetId> = memo.fresh.iter().collect();
                ids.sort();
                ids.into_iter()
                    .map(|id| {
                        let blur = memo.blur.get(id).cloned();
                        let faces = memo.faces.get(id).cloned();
                        let quality = blur
                            .as_ref()
                            .map(|b| self.selector.scorer().score(b, faces.as_ref()));
                        PhotoAnalysisResult {
                            blur,
                            faces,
                            quality,
                            ..PhotoAnalysisResult::new(id.clone())
                        }
                    })
                    .collect()
            }
            Err(e) => {
                log::warn!("Not caching results: {}", e);
                return;
            }
        };

        if let Err(e) = cache.save_many(&entries) {
            log::warn!("Failed to cache {} analysis results: {}", entries.len(), e);
        }
    }
}

fn file_sizes(assets: &[AssetDescriptor]) -> HashMap<&str, i64> {
    assets.iter().map(|a| (a.id.as_str(), a.file_size)).collect()
}

fn build_group(
    group_type: GroupType,
    ids: Vec<AssetId>,
    sizes: &HashMap<&str, i64>,
) -> AnalysisResult<PhotoGroup> {
    let file_sizes = ids
        .iter()
        .map(|id| sizes.get(id.as_str()).copied().unwrap_or(0))
        .collect();
    PhotoGroup::new(group_type, ids, file_sizes)
}

fn single_group(
    group_type: GroupType,
    ids: Vec<AssetId>,
    sizes: &HashMap<&str, i64>,
) -> AnalysisResult<Vec<PhotoGroup>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![build_group(group_type, ids, sizes)?])
}
