//! deconv3d CLI - Deconvolve a synthetic scene from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use deconv3d::{
    compute::{
        CachedFourierOperator, ConvolutionOperator, DeconvError, RichardsonLucy, Volume, psf,
    },
    schema::{DeconvConfig, SceneConfig, apply_shot_noise},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [iterations]", args[0]);
        eprintln!();
        eprintln!("Deconvolve a synthetic 3D scene with Richardson-Lucy.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to run configuration file");
        eprintln!("  iterations   Override the configured iteration count");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);

    let mut config = DeconvConfig::load(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });
    match parse_iterations(args.get(2).map(String::as_str)) {
        Ok(Some(iterations)) => config.iterations = iterations,
        Ok(None) => {}
        Err(e) => {
            eprintln!("Error parsing iterations: {}", e);
            std::process::exit(1);
        }
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {}", e);
        std::process::exit(1);
    }

    // Load or create scene
    let scene_path = config_path.with_extension("scene.json");
    let scene: SceneConfig = if scene_path.exists() {
        let scene_str = fs::read_to_string(&scene_path).unwrap_or_else(|e| {
            eprintln!("Error reading scene file: {}", e);
            std::process::exit(1);
        });
        serde_json::from_str(&scene_str).unwrap_or_else(|e| {
            eprintln!("Error parsing scene: {}", e);
            std::process::exit(1);
        })
    } else {
        SceneConfig::default()
    };
    if let Err(e) = scene.validate() {
        eprintln!("Invalid scene: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&config, &scene) {
        eprintln!("Deconvolution failed: {}", e);
        std::process::exit(1);
    }
}

fn run(config: &DeconvConfig, scene: &SceneConfig) -> Result<(), DeconvError> {
    let shape = scene.shape();

    println!("Richardson-Lucy Deconvolution");
    println!("=============================");
    println!("Volume: {}", shape);
    println!("PSF: {:?}", scene.psf);
    println!("Operator: {:?} ({:?} boundary)", config.operator, config.boundary);
    println!("Iterations: {}", config.iterations);
    println!();

    // Synthesize measurement
    let object = scene.object();
    let kernel = psf::from_model(&scene.psf)?;

    let mut blur = CachedFourierOperator::new();
    blur.compute(&kernel, shape)?;
    let mut blurred = vec![0.0f32; shape.len()];
    blur.forward(object.as_slice(), &mut blurred)?;
    // Rounding in the transform can leave tiny negative values.
    blurred.iter_mut().for_each(|v| *v = v.max(0.0));
    let mut data = Volume::new(shape, blurred)?;
    if let Some(noise) = &scene.noise {
        apply_shot_noise(&mut data, noise);
    }

    println!("Measurement:");
    println!("  Total intensity: {:.3}", data.sum());
    println!("  Peak: {:.3} at {:?}", data.max(), data.argmax());
    println!();

    // Configure solver
    let mut solver = RichardsonLucy::from_config(config);
    solver.operator_mut().compute(&kernel, shape)?;
    let monitor = solver.monitor();

    println!("Running deconvolution...");
    let start = Instant::now();

    let lambda = config.lambda;
    let iterations = config.iterations;
    let worker = thread::spawn(move || solver.deconv(&data, lambda, iterations));

    let mut last_reported = 0;
    while !worker.is_finished() {
        let snapshot = monitor.snapshot();
        if snapshot.iteration > last_reported {
            last_reported = snapshot.iteration;
            println!(
                "  Iteration {}/{}: residual norm {:.6}",
                snapshot.iteration,
                snapshot.total_iterations,
                snapshot.residual_norm.unwrap_or(f32::NAN)
            );
        }
        thread::sleep(Duration::from_millis(100));
    }

    let outcome = match worker.join() {
        Ok(result) => result?,
        Err(_) => {
            eprintln!("Solver thread panicked");
            std::process::exit(1);
        }
    };
    let elapsed = start.elapsed();

    let rms = rms_error(&outcome.estimate, &object);

    println!();
    println!("Result ({:?}):", outcome.status);
    println!("  Iterations: {}", outcome.iterations_completed);
    println!(
        "  Final residual norm: {:.6}",
        outcome.residual_norms.last().copied().unwrap_or(f32::NAN)
    );
    println!(
        "  Peak: {:.3} at {:?} (object peak at {:?})",
        outcome.estimate.max(),
        outcome.estimate.argmax(),
        object.argmax()
    );
    println!("  RMS error vs object: {:.6}", rms);
    println!(
        "Time: {:.2}s ({:.1} iterations/s)",
        elapsed.as_secs_f32(),
        outcome.iterations_completed as f32 / elapsed.as_secs_f32()
    );

    Ok(())
}

/// Parse the optional iteration-count override.
fn parse_iterations(arg: Option<&str>) -> Result<Option<usize>, std::num::ParseIntError> {
    arg.map(str::parse).transpose()
}

fn rms_error(estimate: &Volume, object: &Volume) -> f64 {
    let sum_sq: f64 = estimate
        .as_slice()
        .iter()
        .zip(object.as_slice())
        .map(|(&a, &b)| {
            let diff = (a - b) as f64;
            diff * diff
        })
        .sum();
    (sum_sq / estimate.len().max(1) as f64).sqrt()
}

fn print_example_config() {
    let config = DeconvConfig::default();
    let scene = SceneConfig::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
    println!();
    println!("Example scene (config.scene.json):");
    match serde_json::to_string_pretty(&scene) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing scene: {}", e),
    }
}
