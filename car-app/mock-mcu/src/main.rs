mod sim;

use car_core::{
    mk_static,
    utils::{
        config::{RobotConfig, SensorMode},
        controllers::{
            ultrasonic::{MockEcho, MockPattern},
            Coordinator, DistanceSource, L298n, MotorChannel,
        },
        Duration, Instant,
    },
};
use clap::{Parser, ValueEnum};
use embassy_executor::{Executor, Spawner};
use embassy_time::Timer;
use rand_core::{OsRng, UnwrapErr};
use sim::{LogPin, LogPwm, SimBroker, SimWifi};
use tracing::{error, info, warn};

type Bridge = L298n<LogPin, LogPin, LogPwm, LogPin, LogPin, LogPwm>;
type Car = Coordinator<SimWifi, SimBroker, Bridge>;

#[derive(Clone, Copy, ValueEnum)]
enum Pattern {
    Fixed,
    Wave,
    Random,
}

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts
{
    /// JSON config file; missing fields use firmware defaults
    #[clap(long)]
    config: Option<std::path::PathBuf>,
    /// override the obstacle threshold (cm)
    #[clap(long)]
    threshold_cm: Option<f32>,
    /// override the telemetry period (ms)
    #[clap(long)]
    telemetry_ms: Option<u64>,
    /// synthetic distance pattern
    #[clap(long, value_enum, default_value = "wave")]
    pattern: Pattern,
    /// distance for the fixed pattern, center for the wave (cm)
    #[clap(long, default_value_t = 40.0)]
    distance: f32,
    /// comma separated operator commands, replayed in a loop
    #[clap(long, default_value = "forward,left 120,banana,forward 180,stop")]
    script: String,
    /// time between scripted commands (ms)
    #[clap(long, default_value_t = 2000)]
    command_interval_ms: u64,
    /// force a broker disconnect after this many seconds of session
    #[clap(long)]
    drop_every_secs: Option<u64>,
    /// control loop period (ms)
    #[clap(long, default_value_t = 20)]
    loop_ms: u64,
    /// stop after this many seconds
    #[clap(long)]
    duration_secs: Option<u64>,
}

fn load_config(opts: &Opts) -> Result<RobotConfig, String> {
    let mut config = match &opts.config {
        Some(path) => {
            let doc = std::fs::read_to_string(path)
                .map_err(|e| format!("reading {}: {e}", path.display()))?;
            RobotConfig::from_json(&doc).map_err(|e| e.to_string())?
        }
        None => RobotConfig::default(),
    };
    if let Some(cm) = opts.threshold_cm {
        config.obstacle_threshold_cm = cm;
    }
    if let Some(ms) = opts.telemetry_ms {
        config.telemetry_period_ms = ms;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn build_sensor(
    opts: &Opts,
    config: &RobotConfig,
) -> DistanceSource {
    if config.sensor_mode == SensorMode::Real {
        warn!(
            trig = config.pins.trig,
            echo = config.pins.echo,
            "no ultrasonic hardware on host, using mock readings"
        );
    }
    let pattern = match opts.pattern {
        Pattern::Fixed => MockPattern::Fixed(opts.distance),
        Pattern::Wave => MockPattern::Wave {
            center_cm: opts.distance,
            amplitude_cm: opts.distance * 0.75,
            period: 200,
        },
        Pattern::Random => MockPattern::Random {
            rng: Box::new(UnwrapErr(OsRng)),
            min_cm: 5.0,
            max_cm: config.max_range_cm,
        },
    };
    DistanceSource::new(Box::new(MockEcho::new(pattern)), config)
}

fn build_car(
    opts: &Opts,
    config: &RobotConfig,
) -> Car {
    let pins = config.pins;
    let bridge = L298n::new(
        MotorChannel::new(
            LogPin::new("IN3", pins.in3),
            LogPin::new("IN4", pins.in4),
            LogPwm::new("ENB", pins.enb),
        ),
        MotorChannel::new(
            LogPin::new("IN1", pins.in1),
            LogPin::new("IN2", pins.in2),
            LogPwm::new("ENA", pins.ena),
        ),
        config.max_speed,
    );

    let wifi = SimWifi::new(
        config.wifi_ssid.clone(),
        config.wifi_password.clone(),
        Duration::from_millis(300),
    );
    let broker = SimBroker::new(
        format!("{}:{}", config.broker_host, config.broker_port),
        config.client_id.clone(),
        opts.script
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Duration::from_millis(opts.command_interval_ms),
        opts.drop_every_secs.map(Duration::from_secs),
    );

    Coordinator::new(wifi, broker, build_sensor(opts, config), bridge, config)
}

#[embassy_executor::task]
async fn control_task(
    mut car: Car,
    loop_period: Duration,
    stop_at: Option<Instant>,
) {
    let mut next_status = Instant::now();
    loop {
        let now = Instant::now();
        car.step(now);

        if now >= next_status {
            let stats = car.stats();
            info!(
                link = ?car.link().state(),
                desired = ?car.desired(),
                effective = ?car.effective(),
                range = ?car.latest_sample().map(|s| s.range),
                decode_errors = stats.decode_errors,
                interlocks = stats.interlock_engagements,
                "status"
            );
            next_status = now + Duration::from_secs(5);
        }

        if stop_at.is_some_and(|t| now >= t) {
            info!(
                loop_stats = ?car.stats(),
                link_stats = ?car.link().stats(),
                telemetry = ?car.telemetry_stats(),
                "run finished"
            );
            std::process::exit(0);
        }

        Timer::after(loop_period).await;
    }
}

#[embassy_executor::task]
async fn main_task(spawner: Spawner) {
    let opts: Opts = Opts::parse();
    let config = match load_config(&opts) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            std::process::exit(2);
        }
    };
    info!(
        broker = %config.broker_host,
        port = config.broker_port,
        commands = %config.command_topic,
        telemetry = %config.telemetry_topic,
        "starting car"
    );

    let car = build_car(&opts, &config);
    let stop_at = opts
        .duration_secs
        .map(|s| Instant::now() + Duration::from_secs(s));
    spawner
        .spawn(control_task(car, Duration::from_millis(opts.loop_ms), stop_at))
        .unwrap();
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let executor = mk_static!(Executor, Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_task(spawner)).unwrap();
    });
}
