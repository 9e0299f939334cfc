//! Streaming image indexer (§4.6): folds an image's layers into a
//! cumulative index as they arrive, publishing partial results for
//! concurrent readers, and persists the finished index when the producer
//! closes the channel.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::cache::{ImageCache, LayerCache};
use crate::collaborators::Persistence;
use crate::config::IndexerConfig;
use crate::index::Index;
use crate::join;

/// One layer's contribution, as handed off by the download/extract/build
/// pipeline. The producer pushes these in topmost-first order.
#[derive(Debug, Clone)]
pub struct LayerMessage {
    pub layer_digest: String,
    pub position: u8,
    pub serialized_bytes: Vec<u8>,
}

/// Starts the single consumer task that owns `image_digest`'s cumulative
/// index and returns the bounded sender the producer feeds. The task exits
/// once every sender clone is dropped, at which point it serializes and
/// persists the final index.
pub fn spawn_image_indexer(
    image_digest: String,
    layer_cache: Arc<LayerCache>,
    image_cache: Arc<ImageCache>,
    persistence: Arc<dyn Persistence>,
    config: IndexerConfig,
) -> mpsc::Sender<LayerMessage> {
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    tokio::spawn(run(image_digest, rx, layer_cache, image_cache, persistence));
    tx
}

async fn run(
    image_digest: String,
    mut rx: mpsc::Receiver<LayerMessage>,
    layer_cache: Arc<LayerCache>,
    image_cache: Arc<ImageCache>,
    persistence: Arc<dyn Persistence>,
) {
    let slot = image_cache.slot(&image_digest);
    let mut cumulative: Option<Index> = None;
    // True exactly once: the join immediately following adoption of the
    // topmost layer, when the running image's nodes still need stamping.
    let mut first_join_pending = false;

    while let Some(msg) = rx.recv().await {
        let started = Instant::now();

        let cached = match layer_cache.get(&msg.layer_digest) {
            Some(arc) => arc,
            None => match Index::from_bytes(&msg.serialized_bytes, false) {
                Ok(idx) => layer_cache.insert(msg.layer_digest.clone(), idx),
                Err(err) => {
                    log::error!(
                        "failed to deserialize layer index: image={image_digest} layer={} error={err}",
                        msg.layer_digest,
                    );
                    continue;
                }
            },
        };
        let mut layer_index = (*cached).clone();
        layer_index
            .layer_digests
            .insert(msg.position, msg.layer_digest.clone());

        cumulative = Some(match cumulative.take() {
            None => {
                first_join_pending = true;
                layer_index
            }
            Some(running) => {
                let first_join = first_join_pending;
                first_join_pending = false;
                // The freshly-arrived layer sits underneath everything
                // already merged: it is `lower`, the running image is
                // `upper`. See §4.6's ordering-guarantees note.
                join::join(&mut layer_index, &running, msg.position, first_join);
                layer_index
            }
        });

        if msg.position == 0 {
            if let Some(idx) = cumulative.as_mut() {
                idx.is_complete = true;
            }
        }

        log::debug!(
            "layer indexed: image={image_digest} layer={} position={} duration={:?}",
            msg.layer_digest,
            msg.position,
            started.elapsed(),
        );

        *slot.write() = cumulative.clone();
    }

    let Some(final_index) = cumulative else {
        return;
    };

    let bytes = final_index.serialize();
    match persistence.put_index(&image_digest, bytes).await {
        Ok(()) => log::debug!("entire image indexed: image={image_digest}"),
        Err(err) => log::error!(
            "failed to persist image index: image={image_digest} error={err}; in-memory state stands",
        ),
    }
}
