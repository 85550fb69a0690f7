// SPDX-License-Identifier: Apache-2.0
//! Shared test support: an in-process MI48 emulation.


pub(crate) use mock::{MockOperation, MockSensor};
