use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::{load_settings, normalize_server_url},
    gateway::HttpGateway,
    transport::{websocket_url, PushTransport},
    RideEvent, RideLifecycleController, RidePhase, SessionContext, TripDraft,
};
use shared::domain::{GeoPoint, PaymentMethod, RiderId, VehicleClass};

/// Book a ride from the terminal and follow it to completion.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    rider_id: i64,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    pickup_lat: f64,
    #[arg(long)]
    pickup_lon: f64,
    #[arg(long)]
    drop_lat: f64,
    #[arg(long)]
    drop_lon: f64,
    #[arg(long)]
    pickup_area: Option<String>,
    #[arg(long)]
    drop_area: Option<String>,
    #[arg(long, default_value = "car")]
    vehicle: VehicleClass,
    #[arg(long, default_value = "cash")]
    payment_method: PaymentMethod,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    let server_url = normalize_server_url(&settings.server_url)?;

    let mut session = SessionContext::new(RiderId(args.rider_id));
    if let Some(token) = args.token {
        session = session.with_bearer_token(token);
    }

    let gateway = Arc::new(
        HttpGateway::new(server_url.clone(), session.clone(), settings.request_timeout())
            .context("failed to build http gateway")?,
    );
    let push = Arc::new(PushTransport::connect(
        websocket_url(&server_url)?,
        settings.reconnect_delay(),
    ));
    let controller = RideLifecycleController::new(
        session,
        gateway.clone(),
        gateway,
        push,
        settings.poll_interval(),
    );
    let mut events = controller.subscribe_events();

    let quote = controller
        .request_quote(TripDraft {
            pickup: Some(GeoPoint::new(args.pickup_lat, args.pickup_lon)),
            drop_off: Some(GeoPoint::new(args.drop_lat, args.drop_lon)),
            pickup_area: args.pickup_area,
            drop_area: args.drop_area,
        })
        .await?;
    println!("Fares for {:.1} km:", quote.distance_km);
    println!("  bike     Rs {:.2}", quote.bike_fare);
    println!("  auto     Rs {:.2}", quote.auto_fare);
    println!("  car      Rs {:.2}", quote.car_fare);
    println!("  premier  Rs {:.2}", quote.premier_fare);

    let selection = controller.select_vehicle(args.vehicle).await?;
    println!(
        "Selected {} for Rs {:.2}, about {} away.",
        selection.class.as_str(),
        selection.fare,
        selection.arrival_label
    );

    let ride = controller.confirm_booking().await?;
    println!("Ride #{} booked. Waiting for a driver...", ride.id.0);
    if let Some(otp) = &ride.otp {
        println!("Share OTP {otp} with your driver at pickup.");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RideEvent::PhaseChanged { to, .. }) => match to {
                    RidePhase::InProgress => println!("Trip started."),
                    RidePhase::Completed => {
                        println!("Trip completed.");
                        let payment = controller.initiate_payment(args.payment_method).await?;
                        println!(
                            "Payment {} initiated ({:?}, Rs {:.2}).",
                            payment.transaction_id, payment.payment_method, payment.amount
                        );
                        let payment = controller.settle_payment().await?;
                        println!("Payment {:?}.", payment.payment_status);
                        controller.acknowledge_completion().await?;
                        break;
                    }
                    RidePhase::Idle => {
                        println!("Ride cancelled.");
                        break;
                    }
                    _ => {}
                },
                Ok(RideEvent::RideUpdated(ride)) => {
                    if let Some(driver) = &ride.driver_name {
                        println!(
                            "Driver {driver} ({}) is on the way.",
                            ride.vehicle_plate_number.as_deref().unwrap_or("plate pending")
                        );
                    }
                }
                Ok(RideEvent::Error(message)) => eprintln!("warning: {message}"),
                Ok(_) => {}
                Err(err) => {
                    eprintln!("event stream closed: {err}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling ride...");
                controller.cancel().await;
                break;
            }
        }
    }

    Ok(())
}
