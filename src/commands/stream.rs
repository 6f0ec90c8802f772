use crate::cli::StreamArgs;
use crate::exit_codes;
use crate::output;
use imu_telemetry::streaming::{
    Axis, CommandTemplate, LiveView, LocalTransport, PeriodicScheduler, RatePlan, SpectralView,
    TickScheduler,
};
use imu_telemetry::{
    ChannelMode, MetricsSnapshot, PipelineConfig, RateConfig, RemoteTarget, SessionState,
    StreamError, TelemetryHub,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const STATE_POLL: Duration = Duration::from_millis(100);

#[derive(Serialize)]
struct Report {
    elapsed_s: f64,
    #[serde(flatten)]
    metrics: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    newest_t_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spectrum_peak_hz: Option<f64>,
}

#[derive(Serialize)]
struct Summary {
    session_id: String,
    target: String,
    mode: String,
    command: String,
    plan: RatePlan,
    stopped_by: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    duration_s: f64,
    metrics: MetricsSnapshot,
}

fn build_config(args: &StreamArgs) -> Result<PipelineConfig, StreamError> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(command) = &args.command {
        config.command = CommandTemplate::new(command.clone());
    }
    if let Some(binary) = &args.ssh_binary {
        config.ssh_binary = Some(binary.into());
    }
    if let Some(capacity) = args.buffer_capacity {
        config.buffer_capacity = capacity;
    }
    if args.local_decimation {
        config.local_decimation = true;
    }
    config.validate()?;
    Ok(config)
}

fn build_target(args: &StreamArgs) -> Result<RemoteTarget, StreamError> {
    let target = match &args.host {
        Some(host) => host.parse::<RemoteTarget>()?,
        None => RemoteTarget::new("localhost"),
    };
    Ok(match &args.sensor {
        Some(sensor) => target.with_sensor(sensor.clone()),
        None => target,
    })
}

fn build_hub(args: &StreamArgs, config: PipelineConfig) -> Result<TelemetryHub, StreamError> {
    if args.local {
        return Ok(TelemetryHub::new(Arc::new(LocalTransport::new()), config));
    }
    TelemetryHub::with_ssh(config)
}

fn fail(error: &StreamError) -> i32 {
    eprintln!("Error: {}", error);
    exit_codes::for_stream_error(error)
}

pub async fn execute(args: StreamArgs) -> i32 {
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };
    let mode: ChannelMode = match args.mode.parse() {
        Ok(mode) => mode,
        Err(e) => return fail(&e),
    };
    let target = match build_target(&args) {
        Ok(target) => target,
        Err(e) => return fail(&e),
    };
    let spectrum_axis = match args
        .spectrum_axis
        .as_deref()
        .map(|axis| axis.parse::<Axis>())
        .transpose()
    {
        Ok(axis) => axis,
        Err(e) => return fail(&e),
    };
    let hub = match build_hub(&args, config) {
        Ok(hub) => Arc::new(hub),
        Err(e) => return fail(&e),
    };

    let mut rates = RateConfig::new(args.device_hz, args.stream_hz);
    if let Some(record_hz) = args.record_hz {
        rates = rates.with_record_hz(record_hz);
    }

    let started = Instant::now();
    let handle = match hub.start_session(target, rates, mode).await {
        Ok(handle) => handle,
        Err(e) => return fail(&e),
    };

    let (view, plan) = match (hub.subscribe(&handle), hub.rate_plan(&handle)) {
        (Ok(view), Ok(plan)) => (view, plan),
        (Err(e), _) | (_, Err(e)) => return fail(&e),
    };

    // Consumers: a live view for the newest sample and an optional spectrum,
    // both read from the ring on the scheduler's own cadence
    let scheduler = Arc::new(TickScheduler::new());
    let live = LiveView::new(view.clone(), 1);
    let spectral = match spectrum_axis {
        Some(axis) => {
            match SpectralView::new(view, axis, args.spectrum_window, plan.stream.effective_hz) {
                Ok(spectral) => Some(spectral),
                Err(e) => {
                    hub.stop_all().await;
                    return fail(&e);
                }
            }
        }
        None => None,
    };

    let report_interval = Duration::from_millis(args.report_ms.max(10));
    if let Some(spectral) = &spectral {
        spectral.attach(scheduler.as_ref(), report_interval);
    }
    if !args.quiet {
        let hub = Arc::clone(&hub);
        let handle = handle.clone();
        let spectral = spectral.clone();
        let compact = args.compact;
        scheduler.register_periodic(
            report_interval,
            Box::new(move || {
                let Ok(metrics) = hub.get_metrics(&handle) else {
                    return;
                };
                live.refresh();
                let report = Report {
                    elapsed_s: started.elapsed().as_secs_f64(),
                    metrics,
                    newest_t_s: live.frame().snapshot.newest().map(|s| s.t_s),
                    spectrum_peak_hz: spectral
                        .as_ref()
                        .and_then(|s| s.latest())
                        .and_then(|s| s.peak_hz()),
                };
                if let Err(e) = output::print_json(&report, compact) {
                    log::warn!("report dropped: {}", e);
                }
            }),
        );
    }

    let cancel = CancellationToken::new();
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    let deadline = args
        .duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| tokio::time::Instant::now() + Duration::from_secs_f64(d));
    let until_deadline = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(until_deadline);

    // Created once so a signal landing between polls is not lost
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut poll = tokio::time::interval(STATE_POLL);
    let (stopped_by, failure) = loop {
        tokio::select! {
            _ = &mut ctrl_c => break ("interrupt", None),
            _ = &mut until_deadline => break ("duration", None),
            _ = poll.tick() => {
                match hub.session_state(&handle) {
                    Ok(SessionState::Failed { message }) => break ("failure", Some(message)),
                    Ok(_) => {}
                    Err(e) => break ("failure", Some(e.to_string())),
                }
            }
        }
    };

    cancel.cancel();
    let _ = runner.await;

    let metrics = hub.get_metrics(&handle).unwrap_or_default();
    let command = hub
        .sessions()
        .into_iter()
        .find(|info| info.handle == handle)
        .map(|info| info.command)
        .unwrap_or_default();
    hub.stop_session(&handle).await;

    let summary = Summary {
        session_id: handle.id.clone(),
        target: handle.target.clone(),
        mode: mode.to_string(),
        command,
        plan,
        stopped_by,
        failure: failure.clone(),
        duration_s: started.elapsed().as_secs_f64(),
        metrics,
    };
    if let Err(e) = output::print_json(&summary, args.compact) {
        eprintln!("Error: {}", e);
        return exit_codes::EXECUTION_ERROR;
    }

    match failure {
        Some(message) => {
            eprintln!("Error: session failed: {}", message);
            exit_codes::CONNECTION_ERROR
        }
        None => exit_codes::SUCCESS,
    }
}
