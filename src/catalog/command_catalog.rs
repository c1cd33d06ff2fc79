// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mapping from logical tests to shell commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::session::{CommandExecutor, CommandOutput};

use super::LogicalTest;

const PWM_LED: &str = "/sys/devices/platform/soc/18820000.pwm/settings/pwm1/enable";
const PWM_IR_LED: &str = "/sys/devices/platform/soc/18820000.pwm/settings/pwm3/enable";

/// One command in a fixed sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Shell command line.
    pub command: String,
    /// How long to wait for the prompt.
    pub timeout: Duration,
    /// Pause after the command before the next step.
    pub settle: Duration,
}

impl Step {
    /// Creates a step with no settle delay.
    #[must_use]
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            settle: Duration::ZERO,
        }
    }

    /// Sets the pause after this step.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// The commands behind one logical test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// Alternates between two commands.
    Toggle {
        /// Command that switches the feature on.
        on: String,
        /// Command that switches the feature off.
        off: String,
        /// How long to wait for the prompt.
        timeout: Duration,
    },
    /// Runs the same steps every time.
    Sequence(Vec<Step>),
}

/// Result of running a logical test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    /// Whether the final command reached the device.
    pub success: bool,
    /// Output of the final command.
    pub output: String,
    /// What was done, e.g. `LED_ON` or `SPEAKER_TEST`.
    pub label: String,
}

impl TestOutcome {
    fn from_output(label: String, output: CommandOutput) -> Self {
        Self {
            success: output.succeeded(),
            output: output.into_output(),
            label,
        }
    }
}

/// Catalog of logical tests plus per-device toggle state.
///
/// The command table is fixed after construction. Toggle state starts at off
/// for every device and test, and is only updated once a command has
/// reached the device.
///
/// Toggling the same test on the same device is serialized: concurrent
/// [`run`](Self::run) or [`switch`](Self::switch) calls for one key take
/// turns, so two runs always send "on" then "off".
#[derive(Debug)]
pub struct CommandCatalog {
    specs: HashMap<LogicalTest, CommandSpec>,
    toggles: parking_lot::Mutex<HashMap<String, HashMap<LogicalTest, bool>>>,
    /// Held from reading a toggle value until the new value is recorded.
    in_flight: parking_lot::Mutex<HashMap<(String, LogicalTest), Arc<tokio::sync::Mutex<()>>>>,
}

impl CommandCatalog {
    /// Creates a catalog with the camera firmware's commands.
    #[must_use]
    pub fn new() -> Self {
        let toggle_timeout = Duration::from_secs(5);
        let mut specs = HashMap::new();

        specs.insert(
            LogicalTest::Led,
            CommandSpec::Toggle {
                on: format!("echo 1 > {PWM_LED}"),
                off: format!("echo 0 > {PWM_LED}"),
                timeout: toggle_timeout,
            },
        );
        specs.insert(
            LogicalTest::IrLed,
            CommandSpec::Toggle {
                on: format!("echo 1 > {PWM_IR_LED}"),
                off: format!("echo 0 > {PWM_IR_LED}"),
                timeout: toggle_timeout,
            },
        );
        specs.insert(
            LogicalTest::IrCut,
            CommandSpec::Toggle {
                on: "./sbin/control_gpio.sh ircut 1".to_string(),
                off: "./sbin/control_gpio.sh ircut 0".to_string(),
                timeout: toggle_timeout,
            },
        );
        specs.insert(
            LogicalTest::Speaker,
            CommandSpec::Sequence(vec![
                // capture holds the audio device
                Step::new("killall capture", Duration::from_secs(3))
                    .with_settle(Duration::from_secs(1)),
                Step::new("aplay -D hw:0,1 /overlay/test_saudio.wav", Duration::from_secs(10)),
            ]),
        );
        specs.insert(
            LogicalTest::SystemInfo,
            CommandSpec::Sequence(vec![Step::new("status", Duration::from_secs(5))]),
        );
        specs.insert(
            LogicalTest::Reboot,
            CommandSpec::Sequence(vec![Step::new("reboot", Duration::from_secs(5))]),
        );

        Self {
            specs,
            toggles: parking_lot::Mutex::new(HashMap::new()),
            in_flight: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the commands for one test.
    ///
    /// A toggle spec registered for a non-toggle test still alternates.
    #[must_use]
    pub fn with_spec(mut self, test: LogicalTest, spec: CommandSpec) -> Self {
        self.specs.insert(test, spec);
        self
    }

    /// Returns the commands for `test`.
    #[must_use]
    pub fn spec(&self, test: LogicalTest) -> Option<&CommandSpec> {
        self.specs.get(&test)
    }

    /// Returns the command that switches a toggle test on or off.
    #[must_use]
    pub fn toggle_command(&self, test: LogicalTest, on: bool) -> Option<&str> {
        match self.specs.get(&test)? {
            CommandSpec::Toggle { on: on_cmd, off, .. } => Some(if on { on_cmd } else { off }),
            CommandSpec::Sequence(_) => None,
        }
    }

    // =========================================================================
    // Toggle state
    // =========================================================================

    /// Returns the last commanded value of a toggle test on a device.
    ///
    /// Defaults to off.
    #[must_use]
    pub fn state(&self, serial: &str, test: LogicalTest) -> bool {
        self.toggles
            .lock()
            .get(serial)
            .and_then(|tests| tests.get(&test))
            .copied()
            .unwrap_or(false)
    }

    /// Overrides the recorded value of a toggle test on a device.
    pub fn set_state(&self, serial: &str, test: LogicalTest, on: bool) {
        self.toggles
            .lock()
            .entry(serial.to_string())
            .or_default()
            .insert(test, on);
    }

    /// Forgets every recorded value for a device.
    pub fn forget_device(&self, serial: &str) {
        self.toggles.lock().remove(serial);
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Runs a logical test.
    ///
    /// A toggle test switches to the opposite of its last recorded value; a
    /// sequence test runs its steps in order. Unknown tests fail without
    /// touching the device.
    pub async fn run<E: CommandExecutor>(&self, executor: &E, test: LogicalTest) -> TestOutcome {
        match self.specs.get(&test) {
            Some(CommandSpec::Toggle { .. }) => {
                let guard = self.toggle_guard(executor.serial(), test);
                let _held = guard.lock().await;
                let next = !self.state(executor.serial(), test);
                self.deliver(executor, test, next).await
            }
            Some(CommandSpec::Sequence(steps)) => {
                run_sequence(executor, test.label_prefix().to_string(), steps).await
            }
            None => missing(executor, test),
        }
    }

    /// Drives a toggle test to a given value.
    ///
    /// The value is recorded only if the command reached the device.
    pub async fn switch<E: CommandExecutor>(
        &self,
        executor: &E,
        test: LogicalTest,
        on: bool,
    ) -> TestOutcome {
        let guard = self.toggle_guard(executor.serial(), test);
        let _held = guard.lock().await;
        self.deliver(executor, test, on).await
    }

    fn toggle_guard(&self, serial: &str, test: LogicalTest) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.in_flight
                .lock()
                .entry((serial.to_string(), test))
                .or_default(),
        )
    }

    async fn deliver<E: CommandExecutor>(
        &self,
        executor: &E,
        test: LogicalTest,
        on: bool,
    ) -> TestOutcome {
        let Some(CommandSpec::Toggle {
            on: on_cmd,
            off,
            timeout,
        }) = self.specs.get(&test)
        else {
            return missing(executor, test);
        };

        let serial = executor.serial();
        let command = if on { on_cmd } else { off };
        let label = format!("{}_{}", test.label_prefix(), if on { "ON" } else { "OFF" });
        tracing::info!(serial, test = %test, label = %label, "Toggling");

        let output = executor.run_command(command, *timeout).await;
        if output.succeeded() {
            self.set_state(serial, test, on);
        } else {
            tracing::warn!(serial, test = %test, outcome = ?output.outcome(), "Toggle not delivered");
        }
        TestOutcome::from_output(label, output)
    }
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_sequence<E: CommandExecutor>(executor: &E, label: String, steps: &[Step]) -> TestOutcome {
    let mut last = CommandOutput::failed("empty sequence");
    for step in steps {
        last = executor.run_command(&step.command, step.timeout).await;
        if !step.settle.is_zero() {
            tokio::time::sleep(step.settle).await;
        }
    }
    TestOutcome::from_output(label, last)
}

fn missing<E: CommandExecutor>(executor: &E, test: LogicalTest) -> TestOutcome {
    tracing::error!(serial = executor.serial(), test = %test, "No commands registered for test");
    TestOutcome {
        success: false,
        output: String::new(),
        label: test.label_prefix().to_string(),
    }
}
