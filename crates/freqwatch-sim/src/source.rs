use crate::generator::{GeneratorConfig, GeneratorError, SessionGenerator};
use async_trait::async_trait;
use freqwatch_core::{SampleSource, SampleStream, TransportError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// In-process [`SampleSource`] backed by [`SessionGenerator`]s.
///
/// Each subscription spawns a producer task on the current Tokio runtime. The
/// task stops when the stream is dropped, after `max_samples` (clean close),
/// or after `fail_after` (transport error).
pub struct SyntheticSource {
    config: GeneratorConfig,
    subscriptions: AtomicU64,
}

impl SyntheticSource {
    pub fn new(config: GeneratorConfig) -> Result<Self, GeneratorError> {
        config.validate()?;
        Ok(Self {
            config,
            subscriptions: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn subscriptions(&self) -> u64 {
        self.subscriptions.load(Ordering::Relaxed)
    }

    fn rng_for(&self, index: u64) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index)),
            None => StdRng::from_os_rng(),
        }
    }
}

#[async_trait]
impl SampleSource for SyntheticSource {
    async fn subscribe(&self, client_id: &str) -> Result<SampleStream, TransportError> {
        let index = self.subscriptions.fetch_add(1, Ordering::Relaxed);
        let mut generator = SessionGenerator::new(&self.config, self.rng_for(index))
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        info!(
            client = client_id,
            session = generator.session_id(),
            mean = generator.mean(),
            std_dev = generator.std_dev(),
            "new session"
        );

        let (tx, stream) = SampleStream::channel(self.config.channel_capacity);
        let interval = self.config.interval();
        let max_samples = self.config.max_samples;
        let fail_after = self.config.fail_after;

        tokio::spawn(async move {
            let mut ticker = (!interval.is_zero()).then(|| tokio::time::interval(interval));
            loop {
                if let Some(ticker) = ticker.as_mut() {
                    ticker.tick().await;
                }
                let emitted = generator.emitted();
                if max_samples.is_some_and(|max| emitted >= max) {
                    debug!(session = generator.session_id(), emitted, "generator finished");
                    break;
                }
                if fail_after.is_some_and(|limit| emitted >= limit) {
                    let err = TransportError::Broken(format!(
                        "simulated failure after {emitted} samples"
                    ));
                    let _ = tx.send(Err(err)).await;
                    break;
                }

                let sample = generator.next_sample(chrono::Utc::now().timestamp());
                if tx.send(Ok(sample)).await.is_err() {
                    debug!(session = generator.session_id(), "subscriber went away");
                    break;
                }
            }
        });

        Ok(stream)
    }
}
