//! Glue between a front-end, the form and the job supervisor.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::form::FormState;
use super::sink::LogSink;
use super::view::JobView;
use crate::catalog::ModelCatalog;
use crate::job::{JobId, JobSupervisor};
use crate::settings::SettingsStore;
use crate::system::SystemInfo;
use crate::Result;

/// Front-end independent application state.
///
/// Shared behind an `Arc`; every method takes `&self`.
pub struct ConverterController {
    catalog: ModelCatalog,
    form: Mutex<FormState>,
    view: Mutex<JobView>,
    settings: SettingsStore,
    supervisor: JobSupervisor,
    sink: Arc<dyn LogSink>,
    system_info: OnceCell<SystemInfo>,
}

impl ConverterController {
    /// Create the controller and apply persisted settings to the form.
    pub fn new(
        catalog: ModelCatalog,
        settings: SettingsStore,
        supervisor: JobSupervisor,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let form = FormState::new(&catalog);
        let controller = Self {
            catalog,
            form: Mutex::new(form),
            view: Mutex::new(JobView::new()),
            settings,
            supervisor,
            sink,
            system_info: OnceCell::new(),
        };
        controller.load_settings();
        controller
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn form(&self) -> FormState {
        self.form.lock().expect("form lock poisoned").clone()
    }

    /// Edit the form in place. Returns the updated form.
    pub fn update_form<F>(&self, edit: F) -> Result<FormState>
    where
        F: FnOnce(&mut FormState, &ModelCatalog) -> Result<()>,
    {
        let mut form = self.form.lock().expect("form lock poisoned");
        edit(&mut form, &self.catalog)?;
        Ok(form.clone())
    }

    pub fn select_model(&self, label: &str) -> bool {
        self.form
            .lock()
            .expect("form lock poisoned")
            .select_model(&self.catalog, label)
    }

    pub fn view(&self) -> JobView {
        self.view.lock().expect("view lock poisoned").clone()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_active()
    }

    pub fn active_job_id(&self) -> Option<JobId> {
        self.supervisor.active_job_id()
    }

    /// Start a job from the current form. On error the view is untouched.
    ///
    /// The view lock is held across the supervisor call, so a concurrent
    /// [`Self::tick`] applies the job's messages only after `begin`.
    pub fn start(&self) -> Result<JobId> {
        let job = self.form().to_job_config(&self.catalog);
        let mut view = self.view.lock().expect("view lock poisoned");
        let previous = view.clone();
        view.begin();
        match self.supervisor.start(job) {
            Ok(id) => Ok(id),
            Err(e) => {
                *view = previous;
                Err(e)
            }
        }
    }

    /// Request cancellation. Returns whether a job was running.
    pub fn cancel(&self) -> bool {
        if !self.supervisor.cancel() {
            return false;
        }
        self.view
            .lock()
            .expect("view lock poisoned")
            .mark_cancel_requested();
        true
    }

    /// Relay pending worker messages into the view and the sink. Returns the
    /// number of messages handled.
    pub fn tick(&self) -> usize {
        let messages = self.supervisor.poll();
        if messages.is_empty() {
            return 0;
        }

        let mut view = self.view.lock().expect("view lock poisoned");
        for message in &messages {
            if let Some(text) = view.apply(message) {
                self.sink.write_line(&text);
            }
        }
        messages.len()
    }

    /// Run [`Self::tick`] on a fixed interval until the controller is dropped.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(controller) = weak.upgrade() else {
                    debug!("Controller dropped, stopping poller");
                    break;
                };
                controller.tick();
            }
        })
    }

    pub fn clear_log(&self) {
        self.view.lock().expect("view lock poisoned").clear_log();
    }

    /// Re-read the settings file into the form.
    pub fn load_settings(&self) {
        let settings = self.settings.load();
        self.form
            .lock()
            .expect("form lock poisoned")
            .apply_settings(&self.catalog, &settings);
    }

    /// Persist the form. Failures are logged and returned.
    pub fn save_settings(&self) -> Result<()> {
        let settings = self.form().to_settings();
        match self.settings.save(&settings) {
            Ok(()) => {
                debug!("Settings saved to {}", self.settings.path().display());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to save settings: {}", e);
                Err(e)
            }
        }
    }

    pub fn settings_store(&self) -> &SettingsStore {
        &self.settings
    }

    /// Stop any running job, then save settings.
    pub async fn shutdown(&self) {
        if self.supervisor.is_active() {
            info!("Stopping running conversion before exit");
            self.cancel();
            self.supervisor.shutdown().await;
            let mut view = self.view.lock().expect("view lock poisoned");
            view.apply(&crate::job::WorkerMessage::Done);
        }
        let _ = self.save_settings();
    }

    /// GPU summary, queried once.
    pub async fn system_info(&self) -> SystemInfo {
        self.system_info.get_or_init(SystemInfo::query).await.clone()
    }
}
