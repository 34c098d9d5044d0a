use appforge_common::{BuildJob, BuildStep, JobId, JobStatus, StepStatus};
use chrono::{DateTime, Utc};

/// Stages counted towards progress: analyze, spec, build, package, deploy.
pub const TOTAL_STEPS: usize = 5;

const GENERIC_FAILURE: &str = "Build failed";

/// UI-ready state folded from successive job snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildViewModel {
    pub job_id: Option<JobId>,
    pub app_name: String,
    pub status: Option<JobStatus>,
    pub spec: String,
    pub code: String,
    pub preview_url: Option<String>,
    pub export_url: Option<String>,
    pub current_step_index: usize,
    pub log_lines: Vec<String>,
    pub spec_loading: bool,
    pub code_loading: bool,
    pub preview_loading: bool,
    /// Server-side failure reported by the job itself.
    pub error_message: Option<String>,
    /// This observer gave up (timeout, job vanished). Says nothing about the job.
    pub client_error: Option<String>,
    /// Spec is ready and the job waits for an explicit resume.
    pub awaiting_review: bool,
}

impl BuildViewModel {
    /// Fresh state for a newly watched job, with every loader on.
    pub fn watching(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            spec_loading: true,
            code_loading: true,
            preview_loading: true,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, job: &BuildJob) {
        self.job_id = Some(job.id);
        self.app_name.clone_from(&job.app_name);
        self.status = Some(job.status);
        self.current_step_index = job
            .build_log
            .iter()
            .filter(|s| s.status == StepStatus::Success && s.name.is_stage())
            .count()
            .min(TOTAL_STEPS);
        self.awaiting_review = job.status == JobStatus::Waiting;

        if !job.spec.is_empty() {
            self.spec.clone_from(&job.spec);
            self.spec_loading = false;
        }
        if !job.code.is_empty() {
            self.code.clone_from(&job.code);
            self.code_loading = false;
        }
        if let Some(url) = job.preview_url.as_ref().filter(|u| !u.is_empty()) {
            self.preview_url = Some(url.clone());
            self.preview_loading = false;
        }

        self.log_lines = job.build_log.iter().map(format_step).collect();

        match job.status {
            JobStatus::Complete => {
                self.clear_loading();
                self.export_url = job.export_url.clone();
            }
            JobStatus::Failed => {
                self.clear_loading();
                let message = job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                self.log_lines.push(format!(
                    "[{}] {}: {}",
                    clock(job.updated_at),
                    GENERIC_FAILURE,
                    message
                ));
                self.error_message = Some(message);
            }
            _ => {}
        }
    }

    /// The observer stopped watching; the job may still be running.
    pub fn observation_failed(&mut self, message: impl Into<String>) {
        self.client_error = Some(message.into());
        self.clear_loading();
    }

    pub fn logs_as_text(&self) -> String {
        self.log_lines.join("\n")
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }

    /// Complete, but the deploy stage did not produce a preview.
    pub fn is_partial(&self) -> bool {
        self.status == Some(JobStatus::Complete) && self.preview_url.is_none()
    }

    fn clear_loading(&mut self) {
        self.spec_loading = false;
        self.code_loading = false;
        self.preview_loading = false;
    }
}

fn clock(at: DateTime<Utc>) -> String {
    at.format("%H:%M:%S").to_string()
}

pub fn format_step(step: &BuildStep) -> String {
    format!(
        "[{}] {}: {} - {}",
        clock(step.timestamp),
        step.name,
        step.status,
        step.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_common::StepName;
    use chrono::TimeZone;

    fn job(status: JobStatus, build_log: Vec<BuildStep>) -> BuildJob {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();
        BuildJob {
            id: JobId::new(),
            prompt: "Build a todo app".into(),
            app_name: "Todo App".into(),
            owner_id: "user-1".into(),
            status,
            auto_build: true,
            spec: String::new(),
            code: String::new(),
            preview_url: None,
            export_url: None,
            error_message: None,
            build_log,
            created_at: at,
            updated_at: at,
        }
    }

    fn at_noon(mut step: BuildStep) -> BuildStep {
        step.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap();
        step
    }

    #[test]
    fn test_loading_flags_flip_as_fields_arrive() {
        let mut vm = BuildViewModel::watching(JobId::new());
        let mut snapshot = job(JobStatus::Analyzing, vec![]);
        vm.apply(&snapshot);
        assert!(vm.spec_loading && vm.code_loading && vm.preview_loading);

        snapshot.spec = "# Spec".into();
        vm.apply(&snapshot);
        assert!(!vm.spec_loading);
        assert!(vm.code_loading);
        assert_eq!(vm.spec, "# Spec");

        snapshot.status = JobStatus::Running;
        snapshot.code = "<html/>".into();
        vm.apply(&snapshot);
        assert!(!vm.code_loading);
        assert!(vm.preview_loading);
    }

    #[test]
    fn test_step_index_counts_successes_and_caps() {
        let mut vm = BuildViewModel::watching(JobId::new());
        let names = [
            StepName::AnalyzePrompt,
            StepName::GenerateSpec,
            StepName::Waiting,
            StepName::BuildApp,
            StepName::PackageApp,
            StepName::DeployPreview,
        ];
        let log = names.iter().map(|n| BuildStep::success(*n, "ok")).collect();
        vm.apply(&job(JobStatus::Complete, log));
        assert_eq!(vm.current_step_index, TOTAL_STEPS);

        vm.apply(&job(
            JobStatus::Running,
            vec![
                BuildStep::success(StepName::AnalyzePrompt, "ok"),
                BuildStep::pending(StepName::GenerateSpec, "working"),
            ],
        ));
        assert_eq!(vm.current_step_index, 1);
    }

    #[test]
    fn test_step_index_ignores_review_marker() {
        let mut vm = BuildViewModel::watching(JobId::new());
        vm.apply(&job(
            JobStatus::Running,
            vec![
                BuildStep::success(StepName::AnalyzePrompt, "ok"),
                BuildStep::success(StepName::GenerateSpec, "ok"),
                BuildStep::success(StepName::Waiting, "Resumed after specification review"),
                BuildStep::success(StepName::BuildApp, "ok"),
                BuildStep::success(StepName::PackageApp, "ok"),
                BuildStep::pending(StepName::DeployPreview, "Deploying preview"),
            ],
        ));
        assert_eq!(vm.current_step_index, 4);
    }

    #[test]
    fn test_log_lines_are_timestamp_prefixed() {
        let mut vm = BuildViewModel::watching(JobId::new());
        vm.apply(&job(
            JobStatus::Analyzing,
            vec![at_noon(BuildStep::pending(StepName::AnalyzePrompt, "Analyzing prompt"))],
        ));
        assert_eq!(
            vm.logs_as_text(),
            "[12:00:01] analyze_prompt: pending - Analyzing prompt"
        );
    }

    #[test]
    fn test_failed_job_surfaces_error_and_one_final_line() {
        let mut vm = BuildViewModel::watching(JobId::new());
        let mut snapshot = job(
            JobStatus::Failed,
            vec![at_noon(BuildStep::failed(StepName::GenerateSpec, "rate limited"))],
        );
        snapshot.error_message = Some("Specification generation failed: rate limited".into());

        vm.apply(&snapshot);
        vm.apply(&snapshot);

        assert_eq!(
            vm.error_message.as_deref(),
            Some("Specification generation failed: rate limited")
        );
        assert_eq!(vm.log_lines.len(), 2);
        assert_eq!(
            vm.log_lines[1],
            "[12:30:45] Build failed: Specification generation failed: rate limited"
        );
        assert!(!vm.spec_loading && !vm.code_loading && !vm.preview_loading);
        assert!(vm.client_error.is_none());
    }

    #[test]
    fn test_complete_freezes_flags_and_exposes_urls() {
        let mut vm = BuildViewModel::watching(JobId::new());
        let mut snapshot = job(JobStatus::Complete, vec![]);
        snapshot.spec = "# Spec".into();
        snapshot.code = "<html/>".into();
        snapshot.preview_url = Some("https://preview.test/todo".into());
        snapshot.export_url = Some("https://preview.test/todo.zip".into());
        vm.apply(&snapshot);

        assert!(vm.is_finished());
        assert!(!vm.is_partial());
        assert_eq!(vm.export_url.as_deref(), Some("https://preview.test/todo.zip"));
        assert!(!vm.preview_loading);
    }

    #[test]
    fn test_partial_completion_clears_preview_loader() {
        let mut vm = BuildViewModel::watching(JobId::new());
        vm.apply(&job(JobStatus::Complete, vec![]));
        assert!(vm.is_partial());
        assert!(!vm.preview_loading);
        assert!(vm.error_message.is_none());
    }

    #[test]
    fn test_timeout_is_not_a_job_failure() {
        let mut vm = BuildViewModel::watching(JobId::new());
        vm.apply(&job(JobStatus::Running, vec![]));
        vm.observation_failed("Build is taking longer than expected");

        assert_eq!(
            vm.client_error.as_deref(),
            Some("Build is taking longer than expected")
        );
        assert!(vm.error_message.is_none());
        assert!(!vm.is_finished());
    }

    #[test]
    fn test_waiting_sets_awaiting_review() {
        let mut vm = BuildViewModel::watching(JobId::new());
        vm.apply(&job(JobStatus::Waiting, vec![]));
        assert!(vm.awaiting_review);
        vm.apply(&job(JobStatus::Running, vec![]));
        assert!(!vm.awaiting_review);
    }
}
