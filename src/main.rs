use log::{error, info};
use spray::config::{EmitterOptions, PoolOptions, SceneConfig};
use spray::emitter::Emitter;
use spray::particle_system::ParticleSystem;
use spray::render_sink::RecordingSink;

gflags::define! {
    --config: &str = "scene.toml"
}
gflags::define! {
    --seconds: f32 = 5.0
}
gflags::define! {
    --fps: f32 = 60.0
}
gflags::define! {
    /// Triggered pool emitters per second.
    --bursts: u32 = 1
}
gflags::define! {
    --log_filter: &str = "warn,spray=info"
}
gflags::define! {
    -h, --help = false
}

/// A small fountain plus a pool of short bursts.
fn demo_scene() -> SceneConfig {
    let mut burst = EmitterOptions {
        particle_count: 50,
        duration: Some(0.25),
        ..EmitterOptions::default()
    };
    burst.max_age.value = 0.5;
    SceneConfig {
        emitters: vec![EmitterOptions {
            particle_count: 1000,
            ..EmitterOptions::default()
        }],
        pools: vec![PoolOptions {
            count: 4,
            allow_grow: false,
            emitter: burst,
            per_index: Vec::new(),
        }],
        ..SceneConfig::default()
    }
}

fn get_scene_config() -> SceneConfig {
    match SceneConfig::from_file(CONFIG.flag) {
        Ok(scene) => scene,
        Err(e) => {
            error!("Failed to parse config file({}): {:?}", CONFIG.flag, e);
            demo_scene()
        }
    }
}

fn main() {
    let args = gflags::parse();
    if HELP.flag || !args.is_empty() {
        gflags::print_help_and_exit(0);
    }
    scrub_log::init_with_filter_string(LOG_FILTER.flag).unwrap();

    let scene = get_scene_config();
    let mut system = ParticleSystem::with_sink(scene.group.clone(), RecordingSink::new());
    for options in scene.emitters.iter() {
        if let Err(e) = system.add_emitter(Emitter::new(options)) {
            error!("Failed to add emitter: {}", e);
        }
    }
    for pool in scene.pools.iter() {
        if let Err(e) = system.add_pool(pool.count, &pool.creation_options(), pool.allow_grow) {
            error!("Failed to add pool: {}", e);
        }
    }
    info!(
        "{} emitters, {} pooled, {} particle slots",
        system.emitter_count(),
        system.pool_len(),
        system.particle_count()
    );

    let fps = FPS.flag.max(1.0);
    let dt = 1.0 / fps;
    let frames = (SECONDS.flag.max(0.0) * fps).round() as u64;
    let frames_per_second = fps.round().max(1.0) as u64;
    for frame in 0..frames {
        if frame % frames_per_second == 0 && system.pool_len() > 0 {
            let triggered = system.trigger_pool_emitter(BURSTS.flag as usize, None);
            info!("Triggered {} pooled emitters", triggered);
        }
        system.tick(Some(dt));
        if (frame + 1) % frames_per_second == 0 {
            let sink = system.sink();
            info!(
                "t={:.2}s active={} uploaded={} floats in {} uploads, pool={}",
                system.run_time(),
                system.active_particle_count(),
                sink.partial_elements(),
                sink.uploads.len(),
                system.pool_len()
            );
            system.sink_mut().clear_uploads();
        }
    }
    system.dispose();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_scene_survives_toml() {
        let scene = demo_scene();
        let serialized = toml::to_string(&scene).unwrap();
        let parsed: SceneConfig = serialized.parse().unwrap();
        assert_eq!(scene, parsed);
    }

    #[test]
    fn read_config() {
        let scene = SceneConfig::from_file("scene.toml").unwrap();
        assert_eq!(scene.emitters.len(), 2);
        assert_eq!(scene.pools.len(), 1);
        assert_eq!(scene.pools[0].emitter.duration, Some(0.2));
    }
}
