pub mod admin;
pub mod auth;
pub mod chatlog;
pub mod config;
pub mod connection;
pub mod db;
pub mod events;
pub mod hub;
pub mod models;
pub mod routes;
pub mod totp;

use auth::AuthService;
use config::Config;
use db::Db;
use hub::Hub;
use std::sync::Arc;

/// Process-wide state: one persistence handle, one auth service, one hub.
/// Built once at startup and shared by both Rocket instances.
pub struct App {
    pub config: Config,
    pub db: Arc<Db>,
    pub auth: Arc<AuthService>,
    pub hub: Arc<Hub>,
}

impl App {
    pub fn new(config: Config) -> Result<App, String> {
        let db =
            Arc::new(Db::new(&config.db_path).map_err(|e| format!("open database: {e}"))?);
        let auth = Arc::new(
            AuthService::new(
                db.clone(),
                config.auth_secret.clone(),
                config.token_expiry_secs,
            )
            .map_err(|e| format!("auth startup: {e}"))?,
        );
        let hub = Hub::new(db.clone(), auth.clone()).map_err(|e| format!("hub startup: {e}"))?;
        Ok(App {
            config,
            db,
            auth,
            hub,
        })
    }
}

/// The public API server.
pub fn api_rocket(app: &App) -> rocket::Rocket<rocket::Build> {
    // JSON limit sized for a 10MB image in base64 plus wrapper.
    let figment = rocket::Config::figment()
        .merge(("address", app.config.api_addr.ip().to_string()))
        .merge(("port", app.config.api_addr.port()))
        .merge(("limits.json", 16 * 1024 * 1024));

    let sweeper_auth = app.auth.clone();
    rocket::custom(figment)
        .manage(app.config.clone())
        .manage(app.db.clone())
        .manage(app.auth.clone())
        .manage(app.hub.clone())
        .register(
            "/",
            rocket::catchers![routes::unauthorized, routes::forbidden, routes::not_found],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::login,
                routes::register,
                routes::register_info,
                routes::logoff,
                routes::reset_password,
                routes::me,
                routes::list_users,
                routes::list_chats,
                routes::upload_image,
                routes::get_image,
                routes::chat_socket,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Token Sweeper",
            move |_rocket| {
                Box::pin(async move {
                    auth::spawn_token_sweeper(sweeper_auth);
                    println!("⏳ Session token sweeper started");
                })
            },
        ))
}

/// The admin API server, bound to its own (typically loopback) address.
pub fn admin_rocket(app: &App) -> rocket::Rocket<rocket::Build> {
    let figment = rocket::Config::figment()
        .merge(("address", app.config.admin_addr.ip().to_string()))
        .merge(("port", app.config.admin_addr.port()));

    rocket::custom(figment)
        .manage(app.config.clone())
        .manage(app.auth.clone())
        .manage(app.hub.clone())
        .register(
            "/",
            rocket::catchers![routes::unauthorized, routes::forbidden, routes::not_found],
        )
        .mount(
            "/",
            rocket::routes![
                admin::admin_list_users,
                admin::admin_add_user,
                admin::admin_reset_password,
                admin::admin_delete_user,
            ],
        )
}
