use besedka::config::Config;
use besedka::{App, admin_rocket, api_rocket};

#[rocket::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("✗ Configuration error: {e}");
            std::process::exit(2);
        }
    };

    let args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|a| a == "-add-user") {
        let Some(username) = args.get(pos + 1) else {
            eprintln!("usage: besedka -add-user <username>");
            std::process::exit(2);
        };
        let app = match App::new(config) {
            Ok(a) => a,
            Err(e) => {
                eprintln!("✗ Startup failed: {e}");
                std::process::exit(1);
            }
        };
        match app.auth.add_user(username, None) {
            Ok((user, token)) => {
                println!(
                    "Setup link for {}: {}",
                    user.username,
                    app.config.registration_url(&token)
                );
            }
            Err(e) => {
                eprintln!("✗ add-user failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let app = match App::new(config) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("✗ Startup failed: {e}");
            std::process::exit(1);
        }
    };
    println!(
        "💬 besedka: API on {}, admin on {}",
        app.config.api_addr, app.config.admin_addr
    );

    let api = api_rocket(&app).launch();
    let admin = admin_rocket(&app).launch();
    let (api_result, admin_result) = rocket::tokio::join!(api, admin);
    if let Err(e) = api_result {
        eprintln!("✗ API server error: {e}");
        std::process::exit(1);
    }
    if let Err(e) = admin_result {
        eprintln!("✗ Admin server error: {e}");
        std::process::exit(1);
    }
}
