use std::collections::BTreeMap;
use tracing::debug;

use super::smooth::DepthSmoother;
use crate::config::{DepthConfig, TrackingConfig};
use crate::pose::Detection;

/// 追跡中の1人分の状態
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u32,
    pub depth: DepthSmoother,
}

impl Track {
    pub fn new(id: u32, ema_alpha: f32) -> Self {
        Self {
            id,
            depth: DepthSmoother::new(ema_alpha),
        }
    }
}

/// アクティブトラックの集合。追跡セッションが所有する
#[derive(Debug, Clone, Default)]
pub struct TrackStore {
    tracks: BTreeMap<u32, Track>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    /// 昇順のトラックID
    pub fn ids(&self) -> Vec<u32> {
        self.tracks.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    fn insert(&mut self, track: Track) {
        self.tracks.insert(track.id, track);
    }

    fn retain(&mut self, mut keep: impl FnMut(u32) -> bool) {
        self.tracks.retain(|&id, _| keep(id));
    }
}

/// 検出結果からアクティブトラック集合を更新する
#[derive(Debug, Clone)]
pub struct TrackManager {
    person_class: u32,
    person_confidence: f32,
    max_tracks: usize,
    ema_alpha: f32,
}

impl TrackManager {
    pub fn new(person_class: u32, person_confidence: f32, max_tracks: usize, ema_alpha: f32) -> Self {
        Self {
            person_class,
            person_confidence,
            max_tracks,
            ema_alpha,
        }
    }

    pub fn from_config(tracking: &TrackingConfig, depth: &DepthConfig) -> Self {
        Self::new(
            tracking.person_class,
            tracking.person_confidence,
            tracking.max_tracks,
            depth.ema_alpha,
        )
    }

    pub fn max_tracks(&self) -> usize {
        self.max_tracks
    }

    /// 追跡IDつき・人物クラス・信頼度閾値以上の検出のみ残す。同一IDは後勝ち
    pub fn filter(&self, detections: &[Detection]) -> BTreeMap<u32, Detection> {
        detections
            .iter()
            .filter(|d| d.class_id == self.person_class && d.confidence >= self.person_confidence)
            .filter_map(|d| d.track_id.map(|id| (id, d.clone())))
            .collect()
    }

    /// アクティブ集合を更新し、アクティブID → 今フレームの検出 を返す
    ///
    /// 1. 今フレームに居ないIDは即座に削除（平滑化状態も破棄）
    /// 2. 新しいIDを昇順に空きがある分だけ追加。溢れた検出はこのフレームでは捨てる
    pub fn update(&self, store: &mut TrackStore, detections: &[Detection]) -> BTreeMap<u32, Detection> {
        let current = self.filter(detections);

        store.retain(|id| {
            let keep = current.contains_key(&id);
            if !keep {
                debug!(track_id = id, "track lost");
            }
            keep
        });

        for &id in current.keys() {
            if store.len() >= self.max_tracks {
                break;
            }
            if !store.contains(id) {
                debug!(track_id = id, "track admitted");
                store.insert(Track::new(id, self.ema_alpha));
            }
        }

        current
            .into_iter()
            .filter(|(id, _)| store.contains(*id))
            .collect()
    }
}
