// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

//! mipsblast
//!
//! MIPS32 EJTAG debug and programming driver for Altera USB-Blaster probes.

pub mod transport;
pub mod blaster;
pub mod tap;
pub mod ejtag;
pub mod mips32;
pub mod pracc;
pub mod fastdata;
