// Remote command templates
//
// The on-device sampler is external; it learns the device rate, both
// decimation factors and the channel mode through placeholders rendered at
// session start:
//
//   {device_hz} {stream_hz} {stream_decimate} {record_hz} {record_decimate}
//   {channels} {sensor}
//
// `{{` and `}}` produce literal braces.

use crate::streaming::rate::RatePlan;
use crate::streaming::sample::ChannelMode;
use crate::streaming::source::RemoteTarget;
use crate::streaming::types::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COMMAND: &str = "imu-sampler --rate {device_hz} --stream-every {stream_decimate} --record-every {record_decimate} --channels {channels}";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CommandTemplate(String);

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn render(
        &self,
        plan: &RatePlan,
        mode: ChannelMode,
        target: &RemoteTarget,
    ) -> StreamResult<String> {
        let template = self.0.trim();
        if template.is_empty() {
            return Err(StreamError::Config("remote command is empty".to_string()));
        }

        let mut out = String::with_capacity(template.len() + 32);
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(StreamError::Config(format!(
                            "unterminated placeholder in command '{}'",
                            template
                        )));
                    }
                    out.push_str(&Self::resolve(&name, plan, mode, target)?);
                }
                '}' => {
                    return Err(StreamError::Config(format!(
                        "unmatched '}}' in command '{}'",
                        template
                    )))
                }
                c => out.push(c),
            }
        }

        Ok(out)
    }

    fn resolve(
        name: &str,
        plan: &RatePlan,
        mode: ChannelMode,
        target: &RemoteTarget,
    ) -> StreamResult<String> {
        let value = match name.trim() {
            "device_hz" => format_hz(plan.device_hz),
            "stream_hz" => format_hz(plan.stream.effective_hz),
            "stream_decimate" => plan.stream.factor.to_string(),
            "record_hz" => format_hz(plan.record.effective_hz),
            "record_decimate" => plan.record.factor.to_string(),
            "channels" => mode.to_string(),
            "sensor" => target.sensor.clone().ok_or_else(|| {
                StreamError::Config(format!(
                    "command uses {{sensor}} but target {} has no sensor",
                    target
                ))
            })?,
            other => {
                return Err(StreamError::Config(format!(
                    "unknown placeholder '{{{}}}' in remote command",
                    other
                )))
            }
        };
        Ok(value)
    }
}

impl Default for CommandTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

// Whole rates print without a trailing ".0"
fn format_hz(hz: f64) -> String {
    if hz.fract() == 0.0 && hz.abs() < 1e15 {
        format!("{}", hz as i64)
    } else {
        format!("{}", hz)
    }
}
