//! Emergency response: a one-shot calling campaign driven by emergency-tier
//! sound alerts.
//!
//! A campaign dials the user's emergency contacts in priority order, then,
//! after a cooldown that gives the user a chance to cancel, the regional
//! emergency services number. At most one campaign runs at a time; alerts
//! arriving while one is active are ignored. Individual call failures are
//! reported and never halt the sequence.

pub mod region;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::events::{CallOutcome, CampaignEvent, CampaignStage, Severity, SoundAlert};

use region::RegionTable;

/// Source of the user's configured emergency contacts, in priority order.
pub trait ContactResolver: Send + Sync + 'static {
    fn emergency_contacts(&self) -> Vec<CallTarget>;
}

/// Platform call placement. Implementations block until the dial attempt
/// is handed to the OS, not until the call ends.
pub trait Telephony: Send + Sync + 'static {
    fn place_call(&self, number: &str) -> Result<()>;
}

/// Where the device currently is, as an ISO 3166-1 alpha-2 country code.
pub trait RegionInfo: Send + Sync + 'static {
    fn country_code(&self) -> Option<String>;
}

/// One number to dial.
#[derive(Debug, Clone)]
pub struct CallTarget {
    pub label: String,
    pub number: String,
}

#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// Pause between consecutive contact calls.
    pub inter_call_delay: Duration,
    /// Cancellation window between the last contact and emergency services.
    pub services_cooldown: Duration,
    /// How many contacts are dialled at most.
    pub max_contacts: usize,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            inter_call_delay: Duration::from_secs(2),
            services_cooldown: Duration::from_secs(5),
            max_contacts: 3,
        }
    }
}

/// A running (or the most recent) calling campaign.
#[derive(Debug, Clone)]
pub struct EmergencyCampaign {
    pub trigger: SoundAlert,
    pub targets: Vec<(CampaignStage, CallTarget)>,
    pub current_index: usize,
    pub started_at: DateTime<Utc>,
}

pub struct EmergencyResponseOrchestrator {
    config: CampaignConfig,
    contacts: Arc<dyn ContactResolver>,
    telephony: Arc<dyn Telephony>,
    region: Arc<dyn RegionInfo>,
    region_table: RegionTable,
    active: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    current: Arc<Mutex<Option<EmergencyCampaign>>>,
    campaign_tx: broadcast::Sender<CampaignEvent>,
}

impl EmergencyResponseOrchestrator {
    pub fn new(
        config: CampaignConfig,
        contacts: Arc<dyn ContactResolver>,
        telephony: Arc<dyn Telephony>,
        region: Arc<dyn RegionInfo>,
    ) -> Self {
        let (campaign_tx, _) = broadcast::channel(64);
        Self {
            config,
            contacts,
            telephony,
            region,
            region_table: RegionTable::default(),
            active: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            current: Arc::new(Mutex::new(None)),
            campaign_tx,
        }
    }

    /// Per-call progress of the running campaign.
    pub fn subscribe_campaign(&self) -> broadcast::Receiver<CampaignEvent> {
        self.campaign_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Snapshot of the campaign currently in flight, if any.
    pub fn current_campaign(&self) -> Option<EmergencyCampaign> {
        self.current.lock().clone()
    }

    /// React to a sound alert. Only emergency-tier alerts start a campaign,
    /// and only when none is already running. Returns whether one started.
    pub fn handle_alert(&self, alert: &SoundAlert) -> bool {
        if alert.severity < Severity::Emergency {
            return false;
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(category = %alert.category, "campaign already active, alert ignored");
            return false;
        }
        self.cancelled.store(false, Ordering::SeqCst);

        let mut targets: Vec<(CampaignStage, CallTarget)> = self
            .contacts
            .emergency_contacts()
            .into_iter()
            .take(self.config.max_contacts)
            .map(|t| (CampaignStage::Contact, t))
            .collect();
        let country = self.region.country_code();
        let services_number = self
            .region_table
            .resolve(country.as_deref(), alert.category);
        targets.push((
            CampaignStage::Services,
            CallTarget {
                label: "emergency services".to_string(),
                number: services_number,
            },
        ));

        let campaign = EmergencyCampaign {
            trigger: alert.clone(),
            targets,
            current_index: 0,
            started_at: Utc::now(),
        };
        info!(
            category = %alert.category,
            targets = campaign.targets.len(),
            country = country.as_deref().unwrap_or("unknown"),
            "starting emergency calling campaign"
        );
        *self.current.lock() = Some(campaign.clone());

        let worker = CampaignWorker {
            config: self.config.clone(),
            telephony: Arc::clone(&self.telephony),
            active: Arc::clone(&self.active),
            cancelled: Arc::clone(&self.cancelled),
            current: Arc::clone(&self.current),
            campaign_tx: self.campaign_tx.clone(),
        };
        if let Err(e) = thread::Builder::new()
            .name("sentra-emergency".to_string())
            .spawn(move || worker.run(campaign))
        {
            error!(error = %e, "failed to spawn campaign thread");
            self.clear_campaign_state();
            return false;
        }
        true
    }

    /// Return to idle when no worker ran, so a later alert can still start
    /// a campaign.
    fn clear_campaign_state(&self) {
        *self.current.lock() = None;
        self.cancelled.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    /// Abort the running campaign. Already-placed calls are unaffected;
    /// remaining targets are never dialled. No-op when idle.
    pub fn cancel(&self) {
        if self.is_active() {
            info!("emergency campaign cancelled by user");
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

/// Everything the campaign thread needs, detached from the orchestrator.
struct CampaignWorker {
    config: CampaignConfig,
    telephony: Arc<dyn Telephony>,
    active: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    current: Arc<Mutex<Option<EmergencyCampaign>>>,
    campaign_tx: broadcast::Sender<CampaignEvent>,
}

impl CampaignWorker {
    fn run(self, campaign: EmergencyCampaign) {
        for (index, (stage, target)) in campaign.targets.iter().enumerate() {
            if self.cancelled.load(Ordering::SeqCst) {
                info!(remaining = campaign.targets.len() - index, "campaign halted");
                break;
            }
            if *stage == CampaignStage::Services {
                // The cancellation window before dialling services.
                if !self.interruptible_sleep(self.config.services_cooldown) {
                    info!("campaign cancelled during services cooldown");
                    break;
                }
            }
            if let Some(ref mut c) = *self.current.lock() {
                c.current_index = index;
            }

            let outcome = if target.number.trim().is_empty() {
                warn!(label = %target.label, "contact has no number, skipping");
                CallOutcome::Skipped
            } else {
                match self.telephony.place_call(&target.number) {
                    Ok(()) => {
                        info!(label = %target.label, number = %target.number, "call placed");
                        CallOutcome::Placed
                    }
                    Err(err) => {
                        error!(label = %target.label, %err, "call failed, continuing");
                        CallOutcome::Failed(err.to_string())
                    }
                }
            };
            let _ = self.campaign_tx.send(CampaignEvent {
                target_index: index,
                label: target.label.clone(),
                number: target.number.clone(),
                stage: *stage,
                outcome,
                timestamp: Utc::now(),
            });

            let more_contacts = campaign
                .targets
                .get(index + 1)
                .map(|(s, _)| *s == CampaignStage::Contact)
                .unwrap_or(false);
            if more_contacts && !self.interruptible_sleep(self.config.inter_call_delay) {
                info!("campaign cancelled between contact calls");
                break;
            }
        }

        *self.current.lock() = None;
        self.cancelled.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    /// Sleep in short slices so cancellation takes effect promptly.
    /// Returns false when cancelled.
    fn interruptible_sleep(&self, total: Duration) -> bool {
        let slice = Duration::from_millis(50);
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            let step = remaining.min(slice);
            thread::sleep(step);
            remaining -= step;
        }
        !self.cancelled.load(Ordering::SeqCst)
    }
}
