use clap::Parser;

use bloom_renderer::args::Args;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    log::info!("Rendering {} ({:?} path)", config.model_path.display(), config.render_path);

    if let Err(e) = bloom_renderer::window::run(config) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
