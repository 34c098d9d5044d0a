use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::client::view_model::{BuildViewModel, TOTAL_STEPS};
use crate::ui::icons::{CHECK, CLOCK, CROSS, LINK, PAUSE, SPARKLE, WARN};

/// Terminal view of one watched build.
///
/// A step bar tracks `current_step_index` out of the five build stages and a
/// spinner below it shows the job status. New log lines are printed above
/// the bars as they arrive.
pub struct BuildProgressUI {
    multi: MultiProgress,
    step_bar: ProgressBar,
    status_bar: ProgressBar,
    printed: Vec<String>,
}

impl BuildProgressUI {
    pub fn new(app_name: &str) -> Self {
        let multi = MultiProgress::new();

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓░");
        let step_bar = multi.add(ProgressBar::new(TOTAL_STEPS as u64));
        step_bar.set_style(step_style);
        step_bar.set_prefix(" Steps");
        step_bar.set_message(style(app_name).yellow().to_string());

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix("Status");
        status_bar.set_message("queued");
        status_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            step_bar,
            status_bar,
            printed: Vec::new(),
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Bring the bars and the printed log up to date with `vm`.
    pub fn render(&mut self, vm: &BuildViewModel) {
        if !vm.app_name.is_empty() {
            self.step_bar
                .set_message(style(&vm.app_name).yellow().to_string());
        }
        self.step_bar.set_position(vm.current_step_index as u64);

        // A log entry changes in place (pending to success); print it again.
        for (i, line) in vm.log_lines.iter().enumerate() {
            if self.printed.get(i) == Some(line) {
                continue;
            }
            if i < self.printed.len() {
                self.printed[i] = line.clone();
            } else {
                self.printed.push(line.clone());
            }
            self.print_line(format!("  {}", style(line).dim()));
        }

        if let Some(status) = vm.status {
            self.status_bar.set_message(status.to_string());
        }
    }

    /// Hide the bars while `f` runs, e.g. for an interactive prompt.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.multi.suspend(f)
    }

    pub fn awaiting_review(&self, spec: &str) {
        self.status_bar.set_message("waiting for review");
        self.print_line(format!("\n{}{}", PAUSE, style("Specification ready for review:").bold()));
        for line in spec.lines() {
            self.print_line(format!("    {}", line));
        }
        self.print_line("");
    }

    pub fn finish(&self, vm: &BuildViewModel) {
        self.status_bar.finish_and_clear();
        if let Some(err) = &vm.client_error {
            self.step_bar.abandon();
            self.print_line(format!(
                "{}{} {}",
                CLOCK,
                style(err).yellow(),
                style("(the build keeps running on the server)").dim()
            ));
            return;
        }
        if let Some(err) = &vm.error_message {
            self.step_bar.abandon();
            self.print_line(format!("{}{}", CROSS, style(err).red().bold()));
            return;
        }
        self.step_bar.finish();
        if vm.is_partial() {
            self.print_line(format!(
                "{}{}",
                WARN,
                style("Build complete, but the preview could not be deployed").yellow()
            ));
        } else {
            self.print_line(format!("{}{}", CHECK, style("Build complete").green().bold()));
        }
        if let Some(url) = &vm.preview_url {
            self.print_line(format!("{}Preview: {}", LINK, style(url).cyan().underlined()));
        }
        if let Some(url) = &vm.export_url {
            self.print_line(format!("{}Export:  {}", SPARKLE, style(url).cyan()));
        }
    }
}
