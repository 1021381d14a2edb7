// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Modules that support testing.

mod fake;
mod logger;
mod test_lib;

pub use self::{
    fake::{fake_context, fake_context_with, FakeBlockDevices, FakeControl, Fault},
    logger::init_logger,
    test_lib::test_name,
};
