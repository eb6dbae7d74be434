//! GPIO wiring schemes between the Raspberry Pi header and the panel
//! connectors.

/// GPIO bit mask for a single pin.
const fn pin(n: u32) -> u32 {
    1 << n
}

/// Color data pins of one parallel chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPins {
    pub r1: u32,
    pub g1: u32,
    pub b1: u32,
    pub r2: u32,
    pub g2: u32,
    pub b2: u32,
}

impl ChainPins {
    /// Mask of all six color pins.
    pub fn all(&self) -> u32 {
        self.r1 | self.g1 | self.b1 | self.r2 | self.g2 | self.b2
    }

    /// Pins for the upper and lower half, in R, G, B order.
    pub fn halves(&self) -> ([u32; 3], [u32; 3]) {
        ([self.r1, self.g1, self.b1], [self.r2, self.g2, self.b2])
    }
}

/// A named wiring scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareMapping {
    pub name: &'static str,
    pub output_enable: u32,
    pub clock: u32,
    pub strobe: u32,
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
    /// Zero when the wiring has no E line.
    pub e: u32,
    /// Color pins, one entry per supported parallel chain.
    pub chains: &'static [ChainPins],
}

const REGULAR_CHAINS: &[ChainPins] = &[
    ChainPins {
        r1: pin(11),
        g1: pin(27),
        b1: pin(7),
        r2: pin(8),
        g2: pin(9),
        b2: pin(10),
    },
    ChainPins {
        r1: pin(12),
        g1: pin(5),
        b1: pin(6),
        r2: pin(19),
        g2: pin(13),
        b2: pin(20),
    },
    ChainPins {
        r1: pin(14),
        g1: pin(2),
        b1: pin(3),
        r2: pin(26),
        g2: pin(16),
        b2: pin(21),
    },
];

const ADAFRUIT_CHAINS: &[ChainPins] = &[ChainPins {
    r1: pin(5),
    g1: pin(13),
    b1: pin(6),
    r2: pin(12),
    g2: pin(16),
    b2: pin(23),
}];

// Rev1 boards have GPIO 21 where later ones have GPIO 27; drive both.
const REGULAR_PI1_CHAINS: &[ChainPins] = &[ChainPins {
    r1: pin(11),
    g1: pin(21) | pin(27),
    b1: pin(7),
    r2: pin(8),
    g2: pin(9),
    b2: pin(10),
}];

const CLASSIC_CHAINS: &[ChainPins] = &[
    ChainPins {
        r1: pin(17),
        g1: pin(18),
        b1: pin(22),
        r2: pin(23),
        g2: pin(24),
        b2: pin(25),
    },
    ChainPins {
        r1: pin(12),
        g1: pin(5),
        b1: pin(6),
        r2: pin(19),
        g2: pin(13),
        b2: pin(20),
    },
    ChainPins {
        r1: pin(14),
        g1: pin(2),
        b1: pin(3),
        r2: pin(15),
        g2: pin(26),
        b2: pin(21),
    },
];

/// All known wiring schemes.
pub const HARDWARE_MAPPINGS: &[HardwareMapping] = &[
    HardwareMapping {
        name: "regular",
        output_enable: pin(18),
        clock: pin(17),
        strobe: pin(4),
        a: pin(22),
        b: pin(23),
        c: pin(24),
        d: pin(25),
        e: pin(15),
        chains: REGULAR_CHAINS,
    },
    HardwareMapping {
        name: "adafruit-hat",
        output_enable: pin(4),
        clock: pin(17),
        strobe: pin(21),
        a: pin(22),
        b: pin(26),
        c: pin(27),
        d: pin(20),
        e: pin(24),
        chains: ADAFRUIT_CHAINS,
    },
    HardwareMapping {
        name: "adafruit-hat-pwm",
        output_enable: pin(18),
        clock: pin(17),
        strobe: pin(21),
        a: pin(22),
        b: pin(26),
        c: pin(27),
        d: pin(20),
        e: pin(24),
        chains: ADAFRUIT_CHAINS,
    },
    HardwareMapping {
        name: "regular-pi1",
        output_enable: pin(18),
        clock: pin(17),
        strobe: pin(4),
        a: pin(22),
        b: pin(23),
        c: pin(24),
        d: pin(25),
        e: pin(15),
        chains: REGULAR_PI1_CHAINS,
    },
    HardwareMapping {
        name: "classic",
        output_enable: pin(27),
        clock: pin(11),
        strobe: pin(4),
        a: pin(7),
        b: pin(8),
        c: pin(9),
        d: pin(10),
        e: 0,
        chains: CLASSIC_CHAINS,
    },
    HardwareMapping {
        name: "classic-pi1",
        output_enable: pin(0) | pin(2),
        clock: pin(1) | pin(3),
        strobe: pin(4),
        a: pin(7),
        b: pin(8),
        c: pin(9),
        d: pin(10),
        e: 0,
        chains: &[CLASSIC_CHAINS[0]],
    },
];

impl HardwareMapping {
    /// Looks up a mapping by case-insensitive name.
    pub fn find(name: &str) -> Option<&'static HardwareMapping> {
        HARDWARE_MAPPINGS
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// Names of all mappings.
    pub fn names() -> Vec<&'static str> {
        HARDWARE_MAPPINGS.iter().map(|m| m.name).collect()
    }

    /// Number of chains that can be driven in parallel.
    pub fn max_parallel_chains(&self) -> usize {
        self.chains.len()
    }

    /// Address lines in order A, B, C, D, E.
    pub fn address_lines(&self) -> [u32; 5] {
        [self.a, self.b, self.c, self.d, self.e]
    }

    /// Mask of the color pins for the first `parallel` chains.
    pub fn color_bits(&self, parallel: usize) -> u32 {
        self.chains
            .iter()
            .take(parallel)
            .fold(0, |mask, chain| mask | chain.all())
    }

    /// Mask of the address lines needed to select `double_rows` rows.
    pub fn address_bits(&self, double_rows: usize) -> u32 {
        let needed = usize::BITS - double_rows.saturating_sub(1).leading_zeros();
        self.address_lines()
            .iter()
            .take(needed as usize)
            .fold(0, |mask, &line| mask | line)
    }
}
