//! The step state machine driving one wizard run.
//!
//! Steps are processed in order under a cursor. Each step seeds its
//! candidate list from static items, replays any cached discovery data,
//! optionally starts a background scan scoped by the resolved filters of all
//! prior steps, and hands control to the picker. Discovery updates are
//! folded into the live list while the picker is open; the user's
//! resolution (confirm, back, cancel) decides the cursor's next move.

mod state;

pub use state::{DiscoveryStatus, StepRuntimeState};

use std::path::PathBuf;

use tracing::{debug, info, warn};

use pcapsift_types::{
    ArgumentGroup, DiscoveryEvent, DiscoveryRequest, FilterStep, PickItem, PickOutcome, PickerRequest, PickerUpdate,
    StepSelection,
};

use crate::{
    WizardError,
    adapters::{DiscoveryProvider, DiscoveryTask, Picker, PickerSession},
    expr::build_expression,
    merge::{merge_list_data, reselect},
    orchestrate::build_argument_groups,
};

/// Terminal state of a wizard run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardOutcome {
    /// Every step confirmed; the argument groups are ready for the run
    /// orchestrator.
    Completed,
    /// The user cancelled (or navigated back past the first step). No run
    /// must be performed.
    Cancelled,
}

/// How a single step resolved.
enum StepResolution {
    Confirmed,
    Back,
    Cancelled,
}

/// The step-wizard state machine.
///
/// Owns the per-step runtime state exclusively for the duration of one run;
/// collaborators only receive transient views to mutate the live candidate
/// list.
pub struct Wizard<P, D> {
    steps: Vec<FilterStep>,
    runtime: Vec<StepRuntimeState>,
    picker: P,
    discovery: D,
    tool_path: String,
    input_path: PathBuf,
}

impl<P, D> Wizard<P, D>
where
    P: Picker,
    D: DiscoveryProvider,
{
    /// Fails fast with [`WizardError::NoStepsConfigured`] before any state
    /// machine work when the step list is empty.
    pub fn new(
        steps: Vec<FilterStep>,
        picker: P,
        discovery: D,
        tool_path: String,
        input_path: PathBuf,
    ) -> Result<Self, WizardError> {
        if steps.is_empty() {
            return Err(WizardError::NoStepsConfigured);
        }
        let runtime = steps.iter().map(|_| StepRuntimeState::default()).collect();
        Ok(Self {
            steps,
            runtime,
            picker,
            discovery,
            tool_path,
            input_path,
        })
    }

    /// Drive all steps to resolution.
    pub async fn run(&mut self) -> Result<WizardOutcome, WizardError> {
        let mut cursor = 0usize;
        while cursor < self.steps.len() {
            debug!(step = cursor, title = %self.steps[cursor].title, "entering step");
            match self.run_step(cursor).await? {
                StepResolution::Confirmed => cursor += 1,
                StepResolution::Back => {
                    if cursor == 0 {
                        info!("back past the first step; treating as cancel");
                        return Ok(WizardOutcome::Cancelled);
                    }
                    cursor -= 1;
                }
                StepResolution::Cancelled => {
                    info!(step = cursor, "wizard cancelled");
                    return Ok(WizardOutcome::Cancelled);
                }
            }
        }
        info!("all steps confirmed");
        Ok(WizardOutcome::Completed)
    }

    /// Argument groups assembled from the confirmed selections, in step
    /// order. Meaningful after [`Wizard::run`] returned `Completed`.
    pub fn argument_groups(&self) -> Vec<ArgumentGroup> {
        build_argument_groups(&self.steps, &self.runtime)
    }

    async fn run_step(&mut self, index: usize) -> Result<StepResolution, WizardError> {
        let step = self.steps[index].clone();

        // Seed from static items; those are pre-selected by default.
        let mut items: Vec<PickItem> = step
            .static_items
            .iter()
            .map(|record| {
                PickItem::from_record(record.clone(), FilterStep::static_key(record), step.list_description.as_deref())
            })
            .collect();
        let mut selected: Vec<String> = items.iter().map(|item| item.name.clone()).collect();

        // Replay cached discovery data from an earlier visit, then restore
        // the prior selection so a revisited step shows what was confirmed.
        if !self.runtime[index].discovered.is_empty() {
            let cached = self.runtime[index].discovered.clone();
            merge_list_data(&mut items, &cached, &step);
        }
        if let Some(StepSelection::Items(prior)) = &self.runtime[index].selection {
            let prior_keys: Vec<String> = prior.iter().map(|item| item.name.clone()).collect();
            selected = reselect(&items, &prior_keys);
        }

        let mut session = self.picker.open(PickerRequest {
            title: step.title.clone(),
            step_index: index + 1,
            // The final save/run counts as one more step in the prompt.
            total_steps: self.steps.len() + 1,
        })?;
        session.apply(PickerUpdate::Items(items.clone()));
        session.apply(PickerUpdate::Selected(selected));

        let mut task = self.start_discovery_if_needed(index, &step, &mut session);

        let outcome = loop {
            tokio::select! {
                outcome = session.resolve() => break outcome,
                event = next_discovery_event(&mut task), if task.is_some() => match event {
                    Some(DiscoveryEvent::Update(update)) => {
                        for (key, record) in &update {
                            self.runtime[index].discovered.insert(key.clone(), record.clone());
                        }
                        let current = session.selected_keys();
                        merge_list_data(&mut items, &update, &step);
                        let survivors = reselect(&items, &current);
                        session.apply(PickerUpdate::Items(items.clone()));
                        session.apply(PickerUpdate::Selected(survivors));
                    }
                    Some(DiscoveryEvent::Finished(code)) => {
                        session.apply(PickerUpdate::Busy(false));
                        if code == 0 {
                            self.runtime[index].discovery = DiscoveryStatus::Finished;
                        } else {
                            // Non-fatal: keep whatever was discovered and
                            // retry the scan on a later visit.
                            warn!(step = index, code, "discovery scan failed");
                            self.runtime[index].discovery = DiscoveryStatus::NotStarted;
                        }
                        task = None;
                    }
                    None => task = None,
                },
            }
        };

        // An interrupted scan is incomplete under the current history.
        if self.runtime[index].discovery == DiscoveryStatus::InProgress {
            self.runtime[index].discovery = DiscoveryStatus::NotStarted;
        }
        drop(task);

        match outcome {
            PickOutcome::Selected(selection) => {
                self.invalidate_next_if_changed(index, &step, &selection);
                self.runtime[index].selection = Some(selection);
                Ok(StepResolution::Confirmed)
            }
            PickOutcome::Back => Ok(StepResolution::Back),
            PickOutcome::Cancelled => Ok(StepResolution::Cancelled),
        }
    }

    fn start_discovery_if_needed(
        &mut self,
        index: usize,
        step: &FilterStep,
        session: &mut P::Session,
    ) -> Option<D::Task> {
        let query = step.list_provider.as_ref()?;
        if self.runtime[index].discovery == DiscoveryStatus::Finished {
            return None;
        }

        let mut groups = build_argument_groups(&self.steps[..index], &self.runtime[..index]);
        groups.extend(query.args.iter().cloned().map(ArgumentGroup::new));
        let request = DiscoveryRequest {
            tool_path: self.tool_path.clone(),
            argument_groups: groups,
            columns: query.columns.clone(),
            input_path: self.input_path.clone(),
        };

        match self.discovery.start(request) {
            Ok(task) => {
                session.apply(PickerUpdate::Busy(true));
                self.runtime[index].discovery = DiscoveryStatus::InProgress;
                Some(task)
            }
            Err(err) => {
                // Same policy as a failed scan: the user can still pick from
                // static items, and the scan is retried on a later visit.
                warn!(step = index, error = %err, "could not start discovery");
                None
            }
        }
    }

    /// Compare the previously built expression to the fresh one; when they
    /// differ, the immediately following step's finished discovery cache was
    /// computed against a stale upstream history and must be recomputed.
    fn invalidate_next_if_changed(&mut self, index: usize, step: &FilterStep, selection: &StepSelection) {
        let old_expr = self.runtime[index]
            .selection
            .as_ref()
            .map(|old| build_expression(step, old));
        let Some(old_expr) = old_expr else {
            return;
        };
        if index + 1 >= self.steps.len() || self.runtime[index + 1].discovery != DiscoveryStatus::Finished {
            return;
        }
        let new_expr = build_expression(step, selection);
        if old_expr != new_expr {
            debug!(step = index, "filter changed; invalidating next step's discovery cache");
            self.runtime[index + 1].invalidate_discovery();
        }
    }
}

async fn next_discovery_event<T: DiscoveryTask>(task: &mut Option<T>) -> Option<DiscoveryEvent> {
    match task.as_mut() {
        Some(task) => task.next_event().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pcapsift_types::ListData;
    use serde_json::json;
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    #[derive(Clone, Debug)]
    enum Script {
        /// Confirm the keys as shown in list order.
        ConfirmKeys(Vec<&'static str>),
        /// Wait until the key appears (fed by discovery), then confirm it.
        AwaitKeyThenConfirm(&'static str),
        /// Confirm a manual expression override.
        ConfirmRaw(&'static str),
        Back,
        Cancel,
    }

    #[derive(Default)]
    struct SessionRecord {
        title: String,
        initial_item_keys: Vec<String>,
        initial_selected: Vec<String>,
        busy_history: Vec<bool>,
    }

    /// Scripted picker: each session consumes the next script entry.
    #[derive(Clone, Default)]
    struct FakePicker {
        script: Arc<Mutex<VecDeque<Script>>>,
        sessions: Arc<Mutex<Vec<SessionRecord>>>,
    }

    impl FakePicker {
        fn scripted(entries: Vec<Script>) -> Self {
            Self {
                script: Arc::new(Mutex::new(entries.into())),
                sessions: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn session_titles(&self) -> Vec<String> {
            self.sessions.lock().unwrap().iter().map(|s| s.title.clone()).collect()
        }
    }

    struct FakeSession {
        record_index: usize,
        picker: FakePicker,
        items: Vec<PickItem>,
        selected: Vec<String>,
        busy: bool,
        applied: usize,
    }

    impl Picker for FakePicker {
        type Session = FakeSession;

        fn open(&mut self, request: PickerRequest) -> Result<FakeSession, WizardError> {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.push(SessionRecord {
                title: request.title,
                ..SessionRecord::default()
            });
            Ok(FakeSession {
                record_index: sessions.len() - 1,
                picker: self.clone(),
                items: Vec::new(),
                selected: Vec::new(),
                busy: false,
                applied: 0,
            })
        }
    }

    #[async_trait]
    impl PickerSession for FakeSession {
        fn apply(&mut self, update: PickerUpdate) {
            let mut sessions = self.picker.sessions.lock().unwrap();
            let record = &mut sessions[self.record_index];
            match update {
                PickerUpdate::Items(items) => {
                    if self.applied == 0 {
                        record.initial_item_keys = items.iter().map(|i| i.name.clone()).collect();
                    }
                    self.items = items;
                }
                PickerUpdate::Selected(keys) => {
                    if self.applied <= 1 {
                        record.initial_selected = keys.clone();
                    }
                    self.selected = keys;
                }
                PickerUpdate::Busy(busy) => {
                    record.busy_history.push(busy);
                    self.busy = busy;
                }
            }
            self.applied += 1;
        }

        fn selected_keys(&self) -> Vec<String> {
            self.selected.clone()
        }

        async fn resolve(&mut self) -> PickOutcome {
            loop {
                // The scripted user only acts once discovery settled, so the
                // tests observe a deterministic event order. Parked futures
                // are re-created after every merge the engine applies.
                if self.busy {
                    std::future::pending::<()>().await;
                }
                let action = self.picker.script.lock().unwrap().front().cloned();
                match action {
                    None => return PickOutcome::Cancelled,
                    Some(Script::AwaitKeyThenConfirm(key)) if !self.items.iter().any(|i| i.name == key) => {
                        std::future::pending::<()>().await;
                        unreachable!()
                    }
                    Some(action) => {
                        self.picker.script.lock().unwrap().pop_front();
                        return self.perform(action);
                    }
                }
            }
        }
    }

    impl FakeSession {
        fn perform(&self, action: Script) -> PickOutcome {
            match action {
                Script::ConfirmKeys(keys) => {
                    let picked = self
                        .items
                        .iter()
                        .filter(|item| keys.contains(&item.name.as_str()))
                        .cloned()
                        .collect();
                    PickOutcome::Selected(StepSelection::Items(picked))
                }
                Script::AwaitKeyThenConfirm(key) => {
                    let picked = self.items.iter().filter(|item| item.name == key).cloned().collect();
                    PickOutcome::Selected(StepSelection::Items(picked))
                }
                Script::ConfirmRaw(raw) => PickOutcome::Selected(StepSelection::Raw(raw.into())),
                Script::Back => PickOutcome::Back,
                Script::Cancel => PickOutcome::Cancelled,
            }
        }
    }

    /// Scripted discovery: each start consumes the next event batch.
    #[derive(Clone, Default)]
    struct FakeDiscovery {
        batches: Arc<Mutex<VecDeque<Vec<DiscoveryEvent>>>>,
        requests: Arc<Mutex<Vec<DiscoveryRequest>>>,
    }

    impl FakeDiscovery {
        fn scripted(batches: Vec<Vec<DiscoveryEvent>>) -> Self {
            Self {
                batches: Arc::new(Mutex::new(batches.into())),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    struct FakeDiscoveryTask {
        events: VecDeque<DiscoveryEvent>,
    }

    impl DiscoveryProvider for FakeDiscovery {
        type Task = FakeDiscoveryTask;

        fn start(&self, request: DiscoveryRequest) -> Result<FakeDiscoveryTask, WizardError> {
            self.requests.lock().unwrap().push(request);
            let events = self.batches.lock().unwrap().pop_front().unwrap_or_default();
            Ok(FakeDiscoveryTask { events: events.into() })
        }
    }

    #[async_trait]
    impl DiscoveryTask for FakeDiscoveryTask {
        async fn next_event(&mut self) -> Option<DiscoveryEvent> {
            self.events.pop_front()
        }
    }

    fn static_step(title: &str, field: &str, keys: &[&str]) -> FilterStep {
        FilterStep {
            title: title.into(),
            filter_field: field.into(),
            static_items: keys
                .iter()
                .map(|key| json!({"key": key}).as_object().unwrap().clone())
                .collect(),
            ..FilterStep::default()
        }
    }

    fn discovery_step(title: &str, field: &str) -> FilterStep {
        let mut step = static_step(title, field, &[]);
        step.list_provider = serde_json::from_value(json!({"args": [["-T", "fields", "-e", field]]})).ok();
        step
    }

    fn list_data(keys: &[&str]) -> ListData {
        keys.iter().map(|key| (key.to_string(), Default::default())).collect()
    }

    fn finished_batch(keys: &[&str]) -> Vec<DiscoveryEvent> {
        vec![DiscoveryEvent::Update(list_data(keys)), DiscoveryEvent::Finished(0)]
    }

    fn wizard(
        steps: Vec<FilterStep>,
        picker: FakePicker,
        discovery: FakeDiscovery,
    ) -> Wizard<FakePicker, FakeDiscovery> {
        Wizard::new(steps, picker, discovery, "tshark".into(), "/tmp/in.pcap".into()).expect("wizard config")
    }

    #[test]
    fn empty_step_list_is_a_configuration_error() {
        let result = Wizard::new(
            Vec::new(),
            FakePicker::default(),
            FakeDiscovery::default(),
            "tshark".into(),
            "/tmp/in.pcap".into(),
        );
        assert!(matches!(result, Err(WizardError::NoStepsConfigured)));
    }

    #[tokio::test]
    async fn statics_are_preselected_and_confirmation_completes() {
        let picker = FakePicker::scripted(vec![Script::ConfirmKeys(vec!["10"])]);
        let mut wizard = wizard(
            vec![static_step("ttl", "ip.ttl", &["10", "20"])],
            picker.clone(),
            FakeDiscovery::default(),
        );

        let outcome = wizard.run().await.expect("run");
        assert_eq!(outcome, WizardOutcome::Completed);

        let sessions = picker.sessions.lock().unwrap();
        assert_eq!(sessions[0].initial_item_keys, vec!["10", "20"]);
        assert_eq!(sessions[0].initial_selected, vec!["10", "20"]);
        drop(sessions);

        let groups = wizard.argument_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].args, vec!["-Y", "ip.ttl==10"]);
    }

    #[tokio::test]
    async fn cancel_stops_the_machine_immediately() {
        let picker = FakePicker::scripted(vec![Script::Cancel]);
        let mut wizard = wizard(
            vec![static_step("a", "f", &["x"]), static_step("b", "g", &["y"])],
            picker.clone(),
            FakeDiscovery::default(),
        );

        assert_eq!(wizard.run().await.expect("run"), WizardOutcome::Cancelled);
        assert_eq!(picker.session_titles(), vec!["a"]);
    }

    #[tokio::test]
    async fn back_past_the_first_step_cancels() {
        let picker = FakePicker::scripted(vec![Script::Back]);
        let mut wizard = wizard(vec![static_step("a", "f", &["x"])], picker, FakeDiscovery::default());
        assert_eq!(wizard.run().await.expect("run"), WizardOutcome::Cancelled);
    }

    #[tokio::test]
    async fn back_revisits_the_previous_step_with_selection_intact() {
        let picker = FakePicker::scripted(vec![
            Script::ConfirmKeys(vec!["10"]),
            Script::Back,
            Script::ConfirmKeys(vec!["10"]),
            Script::ConfirmKeys(vec!["y"]),
        ]);
        let mut wizard = wizard(
            vec![static_step("first", "f", &["10", "20"]), static_step("second", "g", &["y"])],
            picker.clone(),
            FakeDiscovery::default(),
        );

        assert_eq!(wizard.run().await.expect("run"), WizardOutcome::Completed);
        assert_eq!(picker.session_titles(), vec!["first", "second", "first", "second"]);

        // the revisited first step re-displays the previously confirmed keys
        let sessions = picker.sessions.lock().unwrap();
        assert_eq!(sessions[2].initial_selected, vec!["10"]);
    }

    #[tokio::test]
    async fn discovery_updates_feed_the_open_picker() {
        let picker = FakePicker::scripted(vec![Script::AwaitKeyThenConfirm("TCP")]);
        let discovery = FakeDiscovery::scripted(vec![finished_batch(&["TCP", "UDP"])]);
        let mut wizard = wizard(vec![discovery_step("proto", "protocol")], picker.clone(), discovery.clone());

        assert_eq!(wizard.run().await.expect("run"), WizardOutcome::Completed);
        assert_eq!(discovery.request_count(), 1);

        let sessions = picker.sessions.lock().unwrap();
        assert_eq!(sessions[0].busy_history, vec![true, false]);
        drop(sessions);

        let groups = wizard.argument_groups();
        assert_eq!(groups[0].args, vec!["-Y", "protocol==TCP"]);
    }

    #[tokio::test]
    async fn failed_discovery_is_retried_on_revisit() {
        let picker = FakePicker::scripted(vec![
            // partial results from the failed scan are still selectable
            Script::ConfirmKeys(vec!["TCP"]),
            Script::Back,
            Script::AwaitKeyThenConfirm("TCP"),
            Script::ConfirmKeys(vec!["y"]),
        ]);
        let discovery = FakeDiscovery::scripted(vec![
            vec![DiscoveryEvent::Update(list_data(&["TCP"])), DiscoveryEvent::Finished(2)],
            finished_batch(&["TCP", "UDP"]),
        ]);
        let mut wizard = wizard(
            vec![discovery_step("proto", "protocol"), static_step("end", "g", &["y"])],
            picker,
            discovery.clone(),
        );

        assert_eq!(wizard.run().await.expect("run"), WizardOutcome::Completed);
        // the failed scan left the step unfinished, so the revisit scanned again
        assert_eq!(discovery.request_count(), 2);
        assert_eq!(wizard.runtime[0].discovery, DiscoveryStatus::Finished);
    }

    #[tokio::test]
    async fn changed_upstream_filter_invalidates_next_steps_cache() {
        let picker = FakePicker::scripted(vec![
            Script::ConfirmKeys(vec!["10"]),
            Script::Back,
            Script::ConfirmKeys(vec!["20"]),
            Script::AwaitKeyThenConfirm("TCP"),
        ]);
        let discovery = FakeDiscovery::scripted(vec![finished_batch(&["TCP"]), finished_batch(&["TCP"])]);
        let mut wizard = wizard(
            vec![static_step("ttl", "ip.ttl", &["10", "20"]), discovery_step("proto", "protocol")],
            picker,
            discovery.clone(),
        );

        assert_eq!(wizard.run().await.expect("run"), WizardOutcome::Completed);
        // step 0 re-confirmed with a different expression, so step 1's
        // finished cache was reset and its scan re-ran under the new history
        assert_eq!(discovery.request_count(), 2);
        let second = &discovery.requests.lock().unwrap()[1];
        assert_eq!(second.argument_groups[0].args, vec!["-Y", "ip.ttl==20"]);
    }

    #[tokio::test]
    async fn unchanged_upstream_filter_keeps_next_steps_cache() {
        let picker = FakePicker::scripted(vec![
            Script::ConfirmKeys(vec!["10"]),
            Script::Back,
            Script::ConfirmKeys(vec!["10"]),
            Script::AwaitKeyThenConfirm("TCP"),
        ]);
        let discovery = FakeDiscovery::scripted(vec![finished_batch(&["TCP"])]);
        let mut wizard = wizard(
            vec![static_step("ttl", "ip.ttl", &["10", "20"]), discovery_step("proto", "protocol")],
            picker,
            discovery.clone(),
        );

        assert_eq!(wizard.run().await.expect("run"), WizardOutcome::Completed);
        // same expression on re-confirm: the finished cache survived, no
        // second scan, and the cached candidates seeded the revisited picker
        assert_eq!(discovery.request_count(), 1);
        assert_eq!(wizard.runtime[1].discovery, DiscoveryStatus::Finished);
    }

    #[tokio::test]
    async fn raw_override_passes_through_to_argument_groups() {
        let picker = FakePicker::scripted(vec![Script::ConfirmRaw("tcp.port==80 && !dns")]);
        let mut wizard = wizard(vec![static_step("manual", "f", &[])], picker, FakeDiscovery::default());

        assert_eq!(wizard.run().await.expect("run"), WizardOutcome::Completed);
        assert_eq!(wizard.argument_groups()[0].args, vec!["-Y", "tcp.port==80 && !dns"]);
    }

    #[tokio::test]
    async fn two_step_run_assembles_groups_in_step_order() {
        let picker = FakePicker::scripted(vec![
            Script::ConfirmKeys(vec!["10"]),
            Script::AwaitKeyThenConfirm("TCP"),
        ]);
        let discovery = FakeDiscovery::scripted(vec![finished_batch(&["TCP", "UDP"])]);
        let mut wizard = wizard(
            vec![static_step("ttl", "ip.ttl", &["10", "20"]), discovery_step("proto", "protocol")],
            picker,
            discovery.clone(),
        );

        assert_eq!(wizard.run().await.expect("run"), WizardOutcome::Completed);

        // the second step's scan was scoped by the first step's resolved filter
        let requests = discovery.requests.lock().unwrap();
        assert_eq!(requests[0].argument_groups[0].args, vec!["-Y", "ip.ttl==10"]);
        assert_eq!(requests[0].argument_groups[1].args, vec!["-T", "fields", "-e", "protocol"]);
        drop(requests);

        let groups: Vec<Vec<String>> = wizard.argument_groups().into_iter().map(|g| g.args).collect();
        assert_eq!(groups, vec![vec!["-Y", "ip.ttl==10"], vec!["-Y", "protocol==TCP"]]);
    }
}
