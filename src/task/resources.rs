use assign_resources::assign_resources;
use embassy_rp::adc::InterruptHandler as AdcInterruptHandler;
use embassy_rp::peripherals::PIO0;
use embassy_rp::pio::InterruptHandler as PioInterruptHandler;
use embassy_rp::{bind_interrupts, peripherals};

// group the peripherals into resources, to be used in the tasks
// the resources are assigned to the tasks in main.rs
assign_resources! {
    rtc: RtcResources {
        i2c: I2C0,
        sda: PIN_4,
        scl: PIN_5,
        int_pin: PIN_3, // DS3231 INT/SQW, open drain, active low
    },
    probes: ProbeResources {
        adc: ADC,
        probe_0: PIN_26,
        probe_1: PIN_27,
        probe_2: PIN_28,
    },
    valves: ValveResources {
        valve_0: PIN_10,
        valve_1: PIN_11,
        valve_2: PIN_12,
        valve_3: PIN_13,
    },
    wifi: WifiResources {
        pwr_pin: PIN_23,
        cs_pin: PIN_25,
        pio_sm: PIO0,
        dio_pin: PIN_24,
        clk_pin: PIN_29,
        dma_ch: DMA_CH0,
    },
}

// the RTC is driven blocking, so the I2C needs no interrupt
bind_interrupts!(pub struct Irqs {
    PIO0_IRQ_0 => PioInterruptHandler<PIO0>;
    ADC_IRQ_FIFO => AdcInterruptHandler;
});
