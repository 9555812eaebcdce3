// Emulated transport: delivers routed messages with configurable latency,
// loss and duplication. The duplication knob is what makes the at-least-once
// delivery contract concrete enough to test against.

use crate::error::SwapError;
use crate::network::{Endpoint, NetworkMessage, RelayerInterface};
use crate::simulation::config::SimulationConfig;
use async_trait::async_trait;
use log::{debug, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Duration, Instant};

// Message queued with its scheduled delivery time
#[derive(Debug)]
struct QueuedMessage {
    message: NetworkMessage,
    delivery_time: Instant,
}

/// In-process `RelayerInterface` implementation. Endpoints register an mpsc
/// sender; a background task drains the delay queue and pushes each message
/// to its destination channel.
pub struct EmulatedRelayer {
    config: Arc<SimulationConfig>,
    endpoints: Arc<Mutex<HashMap<Endpoint, mpsc::Sender<NetworkMessage>>>>,
    queue: Arc<Mutex<VecDeque<QueuedMessage>>>,
    rng: Arc<StdMutex<SmallRng>>,
    delivery_task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EmulatedRelayer {
    pub fn new(config: Arc<SimulationConfig>) -> Arc<Self> {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let relayer = Arc::new(EmulatedRelayer {
            config: Arc::clone(&config),
            endpoints: Arc::new(Mutex::new(HashMap::new())),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            rng: Arc::new(StdMutex::new(rng)),
            delivery_task: StdMutex::new(None),
        });

        let endpoints = Arc::clone(&relayer.endpoints);
        let queue = Arc::clone(&relayer.queue);
        let tick = Duration::from_millis(config.relayer_tick_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            Self::delivery_loop(endpoints, queue, tick).await;
        });
        *relayer.delivery_task.lock().unwrap() = Some(handle);
        relayer
    }

    /// Register the channel a logical endpoint receives on.
    pub async fn register_endpoint(&self, endpoint: Endpoint, sender: mpsc::Sender<NetworkMessage>) {
        self.endpoints.lock().await.insert(endpoint, sender);
        debug!("[Relayer] Registered endpoint {endpoint:?}");
    }

    /// Number of messages still waiting for delivery.
    pub async fn queued(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.delivery_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn delivery_loop(
        endpoints: Arc<Mutex<HashMap<Endpoint, mpsc::Sender<NetworkMessage>>>>,
        queue: Arc<Mutex<VecDeque<QueuedMessage>>>,
        tick: Duration,
    ) {
        debug!("[Relayer] Delivery loop started");
        loop {
            let now = Instant::now();
            let mut due = Vec::new();
            {
                let mut queue = queue.lock().await;
                let mut index = 0;
                while index < queue.len() {
                    if queue[index].delivery_time <= now {
                        if let Some(msg) = queue.remove(index) {
                            due.push(msg);
                        }
                    } else {
                        index += 1;
                    }
                }
            }

            if !due.is_empty() {
                let endpoints = endpoints.lock().await;
                for queued in due {
                    let receiver = queued.message.receiver;
                    match endpoints.get(&receiver) {
                        Some(sender) => {
                            if let Err(e) = sender.send(queued.message).await {
                                warn!("[Relayer] Endpoint {receiver:?} channel closed: {e}");
                            }
                        }
                        None => {
                            warn!("[Relayer] No endpoint registered for {receiver:?}; dropping message");
                        }
                    }
                }
            }

            sleep(tick).await;
        }
    }
}

#[async_trait]
impl RelayerInterface for EmulatedRelayer {
    async fn send(&self, msg: NetworkMessage) -> Result<(), SwapError> {
        // Decide loss, duplication and per-copy delay up front.
        let (dropped, copies, delays) = {
            let mut rng = self.rng.lock().unwrap();
            let dropped = self.config.relayer_drop_rate > 0.0
                && rng.gen::<f64>() < self.config.relayer_drop_rate;
            let copies = if !dropped
                && self.config.relayer_duplicate_rate > 0.0
                && rng.gen::<f64>() < self.config.relayer_duplicate_rate
            {
                2
            } else {
                1
            };
            let mut delays = Vec::with_capacity(copies);
            for _ in 0..copies {
                let delay = if self.config.relayer_min_delay_ms >= self.config.relayer_max_delay_ms {
                    self.config.relayer_min_delay_ms
                } else {
                    rng.gen_range(self.config.relayer_min_delay_ms..=self.config.relayer_max_delay_ms)
                };
                delays.push(Duration::from_millis(delay));
            }
            (dropped, copies, delays)
        };

        if dropped {
            debug!("[Relayer] Dropping message {:?} -> {:?}", msg.sender, msg.receiver);
            return Ok(());
        }
        if copies == 2 {
            debug!("[Relayer] Duplicating message {:?} -> {:?}", msg.sender, msg.receiver);
        }

        let mut queue = self.queue.lock().await;
        for delay in delays {
            queue.push_back(QueuedMessage {
                message: msg.clone(),
                delivery_time: Instant::now() + delay,
            });
        }
        Ok(())
    }
}
