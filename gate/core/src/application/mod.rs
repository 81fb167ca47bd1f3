// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod rate_limiter;
pub mod request_gate;
pub mod scope_authorizer;
pub mod token_validator;
