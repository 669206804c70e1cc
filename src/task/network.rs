//! # Network Task
//! Joins the wifi network and serves the configuration/status HTTP server on port 80.
//!
//! # populate constants SSID and PASSWORD
//! make sure to have a wifi_config.json file in the config folder formatted as follows:
//!```json
//!  {
//!     "ssid": "some_ssid_here",
//!     "password": "some_password_here"
//! }
//! ```
//! build.rs turns it into wifi_secrets.rs.
//!
//! One connection is served at a time: read one request, answer it, close. When the link drops the network is joined
//! again before the next connection is accepted.

include!(concat!(env!("OUT_DIR"), "/wifi_secrets.rs"));

use cyw43::JoinOptions;
use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
use defmt::{Debug2Format, info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_net::tcp::{self, TcpSocket};
use embassy_net::{Config, DhcpConfig, Runner, Stack, StackResources};
use embassy_rp::clocks::RoscRng;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIO0};
use embassy_rp::pio::Pio;
use embassy_time::{Duration, Timer};
use rand::RngCore;
use static_cell::StaticCell;
use water_my_garden::http::{HttpError, Status, parse_request, response_head};
use water_my_garden::web::ConfigClient;

use crate::task::resources::{Irqs, WifiResources};

/// DHCP host name.
const HOSTNAME: &str = "watergarden";

/// Port of the configuration server.
const HTTP_PORT: u16 = 80;

/// Pause between failed join attempts.
const JOIN_RETRY: Duration = Duration::from_secs(10);

/// Idle timeout of a client connection.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest request accepted, head and body.
const REQUEST_CAPACITY: usize = 1024;

/// Type alias for the cyw43 runner.
type WifiRunner = cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>;

#[embassy_executor::task]
async fn wifi_task(runner: WifiRunner) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}

/// Join the configured network, retrying until it works.
async fn join(control: &mut cyw43::Control<'static>) {
    loop {
        info!("Joining WPA2 network with SSID: {}", SSID);
        match control.join(SSID, JoinOptions::new(PASSWORD.as_bytes())).await {
            Ok(()) => {
                info!("joined {}", SSID);
                return;
            }
            Err(e) => {
                warn!("join failed: {:?}, retrying", Debug2Format(&e));
                Timer::after(JOIN_RETRY).await;
            }
        }
    }
}

/// Write all of `data`.
async fn write_all(socket: &mut TcpSocket<'_>, mut data: &[u8]) -> Result<(), tcp::Error> {
    while !data.is_empty() {
        let written = socket.write(data).await?;
        if written == 0 {
            return Err(tcp::Error::ConnectionReset);
        }
        data = &data[written..];
    }
    Ok(())
}

/// Write a response head and body.
async fn write_response(
    socket: &mut TcpSocket<'_>,
    status: Status,
    content_type: &str,
    body: &str,
) -> Result<(), tcp::Error> {
    let head = response_head(status, content_type, body.len());
    write_all(socket, head.as_bytes()).await?;
    write_all(socket, body.as_bytes()).await
}

/// Read one request from the socket and answer it.
async fn serve(socket: &mut TcpSocket<'_>, client: &ConfigClient<'_>) -> Result<(), tcp::Error> {
    let mut buffer = [0u8; REQUEST_CAPACITY];
    let mut filled = 0;
    loop {
        if filled == buffer.len() {
            warn!("request larger than {} bytes", REQUEST_CAPACITY);
            return write_response(socket, Status::BadRequest, "text/plain", "Request too large").await;
        }
        let read = socket.read(&mut buffer[filled..]).await?;
        if read == 0 {
            // peer closed before a full request arrived
            return Ok(());
        }
        filled += read;

        match parse_request(&buffer[..filled]) {
            Ok(request) => {
                info!("{} {}", request.method, request.path);
                let reply = client.respond(&request).await;
                return write_response(socket, reply.status, reply.content_type, &reply.body).await;
            }
            Err(HttpError::Incomplete) => {}
            Err(HttpError::Malformed) => {
                return write_response(socket, Status::BadRequest, "text/plain", "Malformed request").await;
            }
        }
    }
}

/// This task brings up the wifi chip and the network stack and then serves HTTP requests forever.
#[embassy_executor::task]
pub async fn network_task(spawner: Spawner, r: WifiResources, client: ConfigClient<'static>) {
    info!("network task started");

    info!("init wifi");
    let pwr = Output::new(r.pwr_pin, Level::Low);
    let cs = Output::new(r.cs_pin, Level::High);
    let mut pio = Pio::new(r.pio_sm, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        r.dio_pin,
        r.clk_pin,
        r.dma_ch,
    );

    // cyw43 firmware and country locale matrix, flashed separately to these addresses
    let fw = unsafe { core::slice::from_raw_parts(0x1010_0000 as *const u8, 230_321) };
    let clm = unsafe { core::slice::from_raw_parts(0x1014_0000 as *const u8, 4752) };

    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());
    let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
    unwrap!(spawner.spawn(wifi_task(runner)));

    info!("init control");
    control.init(clm).await;
    control
        .set_power_management(cyw43::PowerManagementMode::PowerSave)
        .await;

    let mut dhcp_config = DhcpConfig::default();
    dhcp_config.hostname = HOSTNAME.try_into().ok();
    let config = Config::dhcpv4(dhcp_config);

    // random seed
    let mut rng = RoscRng;
    let seed = rng.next_u64();

    static RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
    let (stack, net_runner): (Stack<'static>, _) =
        embassy_net::new(net_device, config, RESOURCES.init(StackResources::new()), seed);
    unwrap!(spawner.spawn(net_task(net_runner)));

    join(&mut control).await;
    stack.wait_config_up().await;
    if let Some(v4) = stack.config_v4() {
        info!("serving on {}:{}", v4.address, HTTP_PORT);
    }

    let mut rx_buffer = [0u8; 1024];
    let mut tx_buffer = [0u8; 4096];
    loop {
        if !stack.is_link_up() {
            warn!("wifi link lost");
            join(&mut control).await;
        }
        stack.wait_config_up().await;

        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));
        if let Err(e) = socket.accept(HTTP_PORT).await {
            warn!("accept failed: {:?}", e);
            continue;
        }
        if let Err(e) = serve(&mut socket, &client).await {
            warn!("connection failed: {:?}", e);
        }
        socket.close();
        // the peer may already be gone, nothing left to do about it
        let _ = socket.flush().await;
    }
}
