use actix_web::{web, App, HttpServer};
use log::info;

use mesh_chess::models::config::Settings;
use mesh_chess::models::AppState;
use mesh_chess::routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings = Settings::from_env();
    info!("Starting relay server at http://{}", settings.relay_bind);

    // Shared relay state
    let app_state = web::Data::new(AppState::default());
    let static_dir = settings.static_dir.clone();

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(|cfg| configure_routes(cfg, &static_dir))
    })
    .bind(&settings.relay_bind)?
    .run()
    .await
}
