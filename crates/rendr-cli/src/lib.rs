// Copyright 2025 rendr Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # rendr CLI
//!
//! Command-line front end for rendr.
//!
//! - `rendr serve <app-dir>`: render an application over HTTP, with the
//!   production engine or, under `--dev` / `DEV`, the development engine
//! - `rendr run <module>`: execute one module on a fresh worker pool and
//!   print its default export as JSON
//!
//! The HTTP layer lives in [`server`] so it can be exercised without the
//! binary.

pub mod server;
