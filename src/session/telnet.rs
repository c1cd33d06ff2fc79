// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Telnet option negotiation filter.
//!
//! Device shells speak Telnet, which interleaves `IAC` command sequences with
//! the text stream. The session only needs the text, so the filter strips
//! every command sequence and refuses every option the server offers or
//! requests. Subnegotiation blocks are discarded.

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum FilterState {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Incremental Telnet command stripper.
///
/// State is kept across calls, so a command split between two reads is
/// still recognised.
#[derive(Debug, Default)]
pub(crate) struct TelnetFilter {
    state: FilterState,
}

impl TelnetFilter {
    /// Strips commands from `input`.
    ///
    /// Payload bytes are appended to `data`; refusals that must be sent back
    /// to the server are appended to `replies`.
    pub(crate) fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match self.state {
                FilterState::Data if byte == IAC => FilterState::Iac,
                FilterState::Data => {
                    data.push(byte);
                    FilterState::Data
                }
                FilterState::Iac => match byte {
                    IAC => {
                        data.push(IAC);
                        FilterState::Data
                    }
                    DO | DONT | WILL | WONT => FilterState::Negotiate(byte),
                    SB => FilterState::Sub,
                    // NOP, GA, AYT and friends carry no payload
                    _ => FilterState::Data,
                },
                FilterState::Negotiate(command) => {
                    match command {
                        WILL => replies.extend_from_slice(&[IAC, DONT, byte]),
                        DO => replies.extend_from_slice(&[IAC, WONT, byte]),
                        _ => {}
                    }
                    FilterState::Data
                }
                FilterState::Sub if byte == IAC => FilterState::SubIac,
                FilterState::Sub => FilterState::Sub,
                FilterState::SubIac if byte == SE => FilterState::Data,
                FilterState::SubIac => FilterState::Sub,
            };
        }
    }
}
