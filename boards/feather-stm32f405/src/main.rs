#![deny(unsafe_code)]
#![no_main]
#![no_std]

extern crate alloc;

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod device_id;
mod eth;
mod indicators;
mod network;
mod sensors;
mod storage;
mod system;
mod tls_buffers;

stm32_tim2_monotonic!(Mono, 1_000_000);

#[global_allocator]
static HEAP: embedded_alloc::LlffHeap = embedded_alloc::LlffHeap::empty();

const HEAP_SIZE: usize = 48 * 1024;

/// Milliseconds since boot from the TIM2 monotonic
struct MonoClock;

impl envnode_hal::Monotonic for MonoClock {
    fn now_ms(&self) -> u64 {
        Mono::now().duration_since_epoch().to_millis()
    }
}

static NET_LED: indicators::LedSignal = indicators::LedSignal::new();
static ALARM_LED: indicators::LedSignal = indicators::LedSignal::new();
static SESSION_LINK: network::SessionLink = network::SessionLink::new();

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2, USART3])]
mod app {
    use super::*;
    use alloc::vec::Vec;
    use defmt::{error, info};
    use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
    use embassy_futures::join::{join, join3, join4, join5};
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
    use embassy_stm32::i2c::{self, I2c};
    use embassy_stm32::mode::{Async, Blocking};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{Hse, HseMode};
    use embassy_stm32::rng::Rng;
    use embassy_stm32::spi::{self, Spi};
    use embassy_stm32::time::Hertz;
    use embassy_stm32::wdg::IndependentWatchdog;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::Channel;
    use embassy_sync::mutex::Mutex;
    use embassy_time::Delay;
    use embedded_hal_bus::spi::ExclusiveDevice;
    use embedded_sdmmc::SdCard;
    use envnode_core::config::{EthernetConfig, MqttConfig, SensorConfig, TimeConfig};
    use envnode_core::config_store::ConfigManager;
    use envnode_core::delivery::DeliveryPipeline;
    use envnode_core::device::DeviceId;
    use envnode_core::maintenance::FactoryResetMonitor;
    use envnode_core::network::{
        CommandHandler, Inbox, LinkOrchestrator, MessagingLink, MessagingOrchestrator,
        SessionEvents, Topics,
    };
    use envnode_core::sampling::SensorChannel;
    use envnode_core::service::TelemetryService;
    use envnode_core::state::{ConnectivityState, StatusBoard};
    use envnode_core::time::{TimeSync, WallClock};
    use rand_core::RngCore;
    use static_cell::StaticCell;

    use indicators::SignalIndicator;
    use network::{MqttSession, MqttTransport, SntpSource};
    use sensors::{MuxedSht4x, MUX_PORTS};
    use storage::SdStore;
    use system::{ActiveLowButton, CortexReset};

    type SpiPeripheral = embassy_stm32::Peri<'static, peripherals::SPI2>;
    type PinPB13 = embassy_stm32::Peri<'static, peripherals::PB13>;
    type PinPB15 = embassy_stm32::Peri<'static, peripherals::PB15>;
    type PinPB14 = embassy_stm32::Peri<'static, peripherals::PB14>;
    type PinPC6 = embassy_stm32::Peri<'static, peripherals::PC6>;
    type PinPC3 = embassy_stm32::Peri<'static, peripherals::PC3>;
    type PinPC2 = embassy_stm32::Peri<'static, peripherals::PC2>;
    type ExtiChannel = embassy_stm32::Peri<'static, peripherals::EXTI2>;
    type DmaTx = embassy_stm32::Peri<'static, peripherals::DMA1_CH4>;
    type DmaRx = embassy_stm32::Peri<'static, peripherals::DMA1_CH3>;

    type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;
    type Store = SdStore<SdSpi, Delay>;
    type I2cBus = Mutex<CriticalSectionRawMutex, I2c<'static, Async>>;

    struct NetworkPeripherals {
        spi: SpiPeripheral,
        sck: PinPB13,
        mosi: PinPB15,
        miso: PinPB14,
        cs: PinPC6,
        reset: PinPC3,
        int: PinPC2,
        exti: ExtiChannel,
        dma_tx: DmaTx,
        dma_rx: DmaRx,
    }

    /// Drivers handed from `init` to the network task
    struct Devices {
        store: Store,
        i2c: I2c<'static, Async>,
        button: ActiveLowButton,
    }

    embassy_stm32::bind_interrupts!(struct Irqs {
        RNG => embassy_stm32::rng::InterruptHandler<peripherals::RNG>;
        I2C1_EV => i2c::EventInterruptHandler<peripherals::I2C1>;
        I2C1_ER => i2c::ErrorInterruptHandler<peripherals::I2C1>;
    });

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        net_led: Output<'static>,
        alarm_led: Output<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Telemetry node starting...");

        {
            use core::mem::MaybeUninit;
            static mut HEAP_MEM: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];
            #[allow(unsafe_code)]
            // SAFETY: called once, before anything allocates
            unsafe {
                HEAP.init(core::ptr::addr_of_mut!(HEAP_MEM) as usize, HEAP_SIZE)
            }
        }

        // Adafruit Feather STM32F405: 12 MHz HSE
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / 6 * 168 = 336 MHz VCO
        // VCO / 4 = 84 MHz SYSCLK, VCO / 7 = 48 MHz for the RNG
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        let p = embassy_stm32::init(config);

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        Mono::start(84_000_000);
        info!("TIM2 monotonic timer initialized at 1 MHz");

        let net_led = Output::new(p.PC1, Level::Low, Speed::Low);
        let alarm_led = Output::new(p.PB4, Level::Low, Speed::Low);
        let button = ActiveLowButton::new(Input::new(p.PC7, Pull::Up));

        // microSD breakout on SPI1 (SCK PA5, MOSI PA7, MISO PA6, CS PA4)
        let mut sd_spi_config = spi::Config::default();
        sd_spi_config.frequency = Hertz(400_000);
        let sd_spi = Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, sd_spi_config);
        let sd_cs = Output::new(p.PA4, Level::High, Speed::VeryHigh);
        let store = match ExclusiveDevice::new(sd_spi, sd_cs, Delay) {
            Ok(device) => SdStore::new(SdCard::new(device, Delay)),
            Err(e) => match e {},
        };

        // SHT4x sensors behind the TCA9548A on I2C1 (SCL PB6, SDA PB7)
        let mut i2c_config = i2c::Config::default();
        i2c_config.frequency = Hertz(100_000);
        let i2c = I2c::new(
            p.I2C1,
            p.PB6,
            p.PB7,
            Irqs,
            p.DMA1_CH6,
            p.DMA1_CH0,
            i2c_config,
        );

        let watchdog = IndependentWatchdog::new(p.IWDG, system::WATCHDOG_TIMEOUT_US);

        let net_periph = NetworkPeripherals {
            spi: p.SPI2,
            sck: p.PB13,
            mosi: p.PB15,
            miso: p.PB14,
            cs: p.PC6,
            reset: p.PC3,
            int: p.PC2,
            exti: p.EXTI2,
            dma_tx: p.DMA1_CH4,
            dma_rx: p.DMA1_CH3,
        };
        let devices = Devices { store, i2c, button };

        watchdog_task::spawn(watchdog).ok();
        status_led::spawn().ok();
        alarm_led::spawn().ok();
        network_task::spawn(net_periph, devices, p.RNG).ok();

        (Shared {}, Local { net_led, alarm_led })
    }

    #[task(priority = 2)]
    async fn watchdog_task(_cx: watchdog_task::Context, watchdog: IndependentWatchdog<'static>) {
        system::feed_watchdog(watchdog).await;
    }

    /// Link state LED
    #[task(priority = 1, local = [net_led])]
    async fn status_led(cx: status_led::Context) {
        indicators::drive_led(cx.local.net_led, &NET_LED).await;
    }

    /// Environmental alarm LED
    #[task(priority = 1, local = [alarm_led])]
    async fn alarm_led(cx: alarm_led::Context) {
        indicators::drive_led(cx.local.alarm_led, &ALARM_LED).await;
    }

    /// Network task: owns the stack and runs every telemetry loop
    ///
    /// Stack is !Send and must remain within this task.
    #[task(priority = 1)]
    async fn network_task(
        _cx: network_task::Context,
        periph: NetworkPeripherals,
        devices: Devices,
        rng_periph: embassy_stm32::Peri<'static, peripherals::RNG>,
    ) -> ! {
        use embassy_net::{Config, StackResources};

        info!("Network task started");
        let Devices { store, i2c, button } = devices;

        let configs = ConfigManager::new(&store);
        let eth_config: EthernetConfig = configs.load();
        let mqtt_config: MqttConfig = configs.load();
        let sensor_config: SensorConfig = configs.load();
        let time_config: TimeConfig = configs.load();

        let mac_addr = device_id::mac_address();
        let device = DeviceId::from_mac(mac_addr);
        info!("Device {}", device);

        let topics = match Topics::new(
            &mqtt_config.topic_root,
            &mqtt_config.telemetry_subtopic,
            &device,
        ) {
            Ok(topics) => topics,
            Err(e) => {
                error!("Configured topics unusable: {}", e);
                let defaults = MqttConfig::default();
                match Topics::new(&defaults.topic_root, &defaults.telemetry_subtopic, &device) {
                    Ok(topics) => topics,
                    Err(e) => defmt::panic!("Default topics unusable: {}", e),
                }
            }
        };

        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(10_000_000); // 10 MHz for W5500
        let spi = Spi::new(
            periph.spi,
            periph.sck,
            periph.mosi,
            periph.miso,
            periph.dma_tx,
            periph.dma_rx,
            spi_config,
        );
        let eth_periph = eth::EthPeripherals {
            spi,
            cs: Output::new(periph.cs, Level::High, Speed::VeryHigh),
            reset: Output::new(periph.reset, Level::High, Speed::Low),
            int: ExtiInput::new(periph.int, periph.exti, Pull::Up),
        };
        let (device_net, w5500_runner) = match eth::init_w5500(eth_periph, mac_addr).await {
            Ok(parts) => parts,
            Err(e) => {
                error!("W5500 init failed: {}, restarting", e);
                cortex_m::peripheral::SCB::sys_reset();
            }
        };

        let mut rng = Rng::new(rng_periph, Irqs);
        static RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
        // No address until the link orchestrator applies the static config
        let (stack, mut net_runner) = embassy_net::new(
            device_net,
            Config::default(),
            RESOURCES.init(StackResources::new()),
            rng.next_u64(),
        );

        let state = ConnectivityState::new();
        let board = StatusBoard::<CriticalSectionRawMutex>::new();
        let clock = WallClock::<CriticalSectionRawMutex>::new(time_config.utc_offset_secs);
        let mono = MonoClock;
        let restart = CortexReset;
        let net_indicator = SignalIndicator::new(&NET_LED);
        let alarm_indicator = SignalIndicator::new(&ALARM_LED);
        let events = SessionEvents::<CriticalSectionRawMutex>::new();
        let inbox: Inbox<CriticalSectionRawMutex> = Channel::new();

        let link = LinkOrchestrator::new(
            eth::W5500Link::new(stack),
            &net_indicator,
            &restart,
            &state,
            &eth_config,
        );
        let mut time_sync = TimeSync::new(
            SntpSource::new(stack),
            &clock,
            &mono,
            &state,
            time_config.sync_interval_ms,
        );

        let messaging_link =
            MessagingLink::<CriticalSectionRawMutex, _>::new(MqttTransport::new(&SESSION_LINK), &state);
        let messaging = MessagingOrchestrator::new(
            &messaging_link,
            &events,
            &state,
            &topics,
            &device,
            &mqtt_config,
        );
        let session = MqttSession::new(
            stack,
            &SESSION_LINK,
            &inbox,
            &events,
            &topics,
            &device,
            &mqtt_config,
        );
        let commands = CommandHandler::new(&messaging_link, &configs, &topics, &device, &restart);

        let pipeline = DeliveryPipeline::new(
            &store,
            &messaging_link,
            &clock,
            &mono,
            &state,
            topics.telemetry.clone(),
            mqtt_config.telemetry_qos(),
        );
        let service =
            TelemetryService::new(&sensor_config, &pipeline, &device, &board, &alarm_indicator);

        static I2C_BUS: StaticCell<I2cBus> = StaticCell::new();
        let i2c_bus = I2C_BUS.init(Mutex::new(i2c));
        let mut channels: Vec<SensorChannel<MuxedSht4x>> = sensor_config
            .channels
            .iter()
            .zip(0..MUX_PORTS)
            .map(|(channel, port)| {
                SensorChannel::new(channel.id, MuxedSht4x::new(I2cDevice::new(i2c_bus), port))
            })
            .collect();
        info!("{} sensor channels configured", channels.len());

        let reset_monitor = FactoryResetMonitor::new(button, &configs, &restart);

        let (mut supervisor_delay, mut indicator_delay, mut sync_delay) = (Delay, Delay, Delay);
        let (mut messaging_delay, mut heartbeat_delay, mut command_delay) = (Delay, Delay, Delay);
        let (mut cycle_delay, mut button_delay) = (Delay, Delay);

        let connectivity = join4(
            link.run_supervisor(&mut supervisor_delay),
            link.run_indicator(&mut indicator_delay),
            time_sync.run(&mut sync_delay),
            messaging.run(&mut messaging_delay),
        );
        let messaging_side = join3(
            messaging.run_heartbeat(&mut heartbeat_delay),
            session.run(&mut rng),
            commands.run(&inbox, &mut command_delay),
        );
        let telemetry = join(
            service.run(&mut channels, &mut cycle_delay),
            reset_monitor.run(&mut button_delay),
        );

        join5(
            w5500_runner.run(),
            net_runner.run(),
            connectivity,
            messaging_side,
            telemetry,
        )
        .await;
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }
}
