use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::Parser;
use operator::{
    interconnect_controller::{run, OperatorArgs, State},
    telemetry,
};

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;
    let args = OperatorArgs::parse();

    // Initialize Kubernetes controller state
    let state = State::default();
    let server = HttpServer::new({
        let state = state.clone();
        move || {
            App::new()
                .app_data(Data::new(state.clone()))
                .wrap(middleware::Logger::default().exclude("/health"))
                .service(index)
                .service(health)
        }
    })
    .bind(&args.bind)?
    .shutdown_timeout(5)
    .run();

    // The server stops with the controller, which exits on signal or a failed preflight
    let server_handle = server.handle();
    let controller = async {
        let result = run(state, args).await;
        server_handle.stop(true).await;
        result
    };
    let (controller_result, server_result) = tokio::join!(controller, server);
    controller_result?;
    server_result?;
    Ok(())
}
