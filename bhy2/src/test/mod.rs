// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
mod mock_hub;

pub(crate) use mock_hub::{BusOperation, MockDelay, MockError, MockSensorHub};
