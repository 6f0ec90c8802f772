use crate::cli::RatesArgs;
use crate::exit_codes;
use crate::output;
use imu_telemetry::RateConfig;

pub fn execute(args: RatesArgs) -> i32 {
    let mut rates = RateConfig::new(args.device_hz, args.stream_hz);
    if let Some(record_hz) = args.record_hz {
        rates = rates.with_record_hz(record_hz);
    }

    let plan = match rates.plan() {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_stream_error(&e);
        }
    };

    log::info!(
        "{} Hz: stream every {}, record every {}",
        plan.device_hz,
        plan.stream.factor,
        plan.record.factor
    );

    match output::print_json(&plan, args.compact) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}
