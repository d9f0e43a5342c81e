//! Command batching for optimized communications
//!
//! Groups compiled points into the fewest read commands the payload limit
//! allows, and packs write values into contiguous write commands. Commands
//! keep indices into their `CommandSet`'s point list instead of copies, so a
//! response can be dispatched straight to the points it serves.

use std::cmp::Ordering;

use tracing::warn;

use super::codec::{self, WriteChunk};
use super::constants;
use super::point;
use super::types::{Area, Point, TagDeclaration};
use crate::bytes::ByteOrder;
use crate::error::ErrorCode;
use crate::sink::Value;

/// Payload cap for one read command in the area's unit
///
/// `max_payload` counts registers. A bit area gets the same payload size
/// in bits (16 per register). Both are capped at the protocol maximum.
pub fn payload_cap(area: Area, max_payload: u16) -> u16 {
    let units = if area.is_bit_area() {
        max_payload.saturating_mul(16)
    } else {
        max_payload
    };
    units.min(area.max_read_quantity())
}

/// Common view over read and write commands
pub trait Command {
    fn slave_id(&self) -> u8;
    fn area(&self) -> Area;
    fn start_address(&self) -> u16;
    fn count(&self) -> u16;
    /// Indices into the owning set's points
    fn point_indices(&self) -> &[usize];
}

/// One wire-level read request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCommand {
    pub slave_id: u8,
    pub area: Area,
    pub start_address: u16,
    pub count: u16,
    pub points: Vec<usize>,
}

impl ReadCommand {
    pub fn function_code(&self) -> u8 {
        self.area.read_function_code()
    }

    fn end(&self) -> u32 {
        u32::from(self.start_address) + u32::from(self.count)
    }
}

/// One wire-level write request with its pre-encoded data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    pub slave_id: u8,
    pub area: Area,
    pub start_address: u16,
    pub count: u16,
    /// FC05, FC06, FC15 or FC16
    pub function_code: u8,
    /// Value field of the request: the u16 for single writes, packed
    /// coils or register bytes for multiple writes
    pub payload: Vec<u8>,
    pub points: Vec<usize>,
}

macro_rules! impl_command {
    ($ty:ty) => {
        impl Command for $ty {
            fn slave_id(&self) -> u8 {
                self.slave_id
            }
            fn area(&self) -> Area {
                self.area
            }
            fn start_address(&self) -> u16 {
                self.start_address
            }
            fn count(&self) -> u16 {
                self.count
            }
            fn point_indices(&self) -> &[usize] {
                &self.points
            }
        }
    };
}

impl_command!(ReadCommand);
impl_command!(WriteCommand);

/// Ordered commands plus the points they serve
#[derive(Debug, Clone)]
pub struct CommandSet<C> {
    pub points: Vec<Point>,
    pub commands: Vec<C>,
    /// Tags excluded from the set, with the error they report
    pub rejected: Vec<(String, ErrorCode)>,
    /// Address base the points were compiled with
    pub address_base: u8,
    /// Payload limit the reads were merged under (0 for writes)
    pub max_payload: u16,
}

pub type ReadSet = CommandSet<ReadCommand>;
pub type WriteSet = CommandSet<WriteCommand>;

impl<C: Command> CommandSet<C> {
    /// Points served by a command, in command order
    pub fn points_of<'a>(&'a self, command: &'a C) -> impl Iterator<Item = &'a Point> + 'a {
        command
            .point_indices()
            .iter()
            .filter_map(|&idx| self.points.get(idx))
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn by_location(a: &Point, b: &Point) -> Ordering {
    (a.slave_id, a.area, a.start_address).cmp(&(b.slave_id, b.area, b.start_address))
}

/// Build read commands
///
/// Points are stably sorted by `(slave, area, address)` and merged first-fit:
/// a point joins the current command when it touches or overlaps the
/// command's range and the merged span stays within the payload cap.
pub fn build_reads(points: Vec<Point>, max_payload: u16) -> ReadSet {
    let mut accepted = Vec::with_capacity(points.len());
    let mut rejected = Vec::new();
    for point in points {
        if point.count > payload_cap(point.area, max_payload) {
            rejected.push((point.name, ErrorCode::InvalidAddress));
        } else {
            accepted.push(point);
        }
    }

    let mut order: Vec<usize> = (0..accepted.len()).collect();
    order.sort_by(|&a, &b| by_location(&accepted[a], &accepted[b]));

    let mut commands: Vec<ReadCommand> = Vec::new();
    for idx in order {
        let point = &accepted[idx];
        let cap = u32::from(payload_cap(point.area, max_payload));

        if let Some(cmd) = commands.last_mut() {
            let same_target = cmd.slave_id == point.slave_id && cmd.area == point.area;
            let touches = u32::from(point.start_address) <= cmd.end();
            let merged_end = cmd.end().max(point.end_address());
            if same_target && touches && merged_end - u32::from(cmd.start_address) <= cap {
                cmd.count = (merged_end - u32::from(cmd.start_address)) as u16;
                cmd.points.push(idx);
                continue;
            }
        }

        commands.push(ReadCommand {
            slave_id: point.slave_id,
            area: point.area,
            start_address: point.start_address,
            count: point.count,
            points: vec![idx],
        });
    }

    CommandSet {
        points: accepted,
        commands,
        rejected,
        address_base: 0,
        max_payload,
    }
}

/// Compile tags and build their read commands in one step
///
/// Tags that fail to compile are reported as `InvalidAddress` in `rejected`.
pub fn compile_reads(tags: &[TagDeclaration], address_base: u8, max_payload: u16) -> ReadSet {
    let (points, failed) = point::compile_all(tags, address_base);
    let mut set = build_reads(points, max_payload);
    let mut rejected: Vec<(String, ErrorCode)> = failed
        .into_iter()
        .map(|(name, err)| {
            warn!("Tag excluded: {}", err);
            (name, ErrorCode::InvalidAddress)
        })
        .collect();
    rejected.append(&mut set.rejected);
    set.rejected = rejected;
    set.address_base = address_base;
    set
}

/// A point with its encoded contribution, before merging
struct Staged {
    point: Point,
    chunk: WriteChunk,
}

/// Build write commands, encoding every value immediately
///
/// Only strictly contiguous, non-overlapping points of the same slave and
/// area are merged, bounded by the multi-write quantity limits. Values that
/// cannot be encoded, and points in read-only areas, land in `rejected`.
pub fn build_writes(entries: Vec<(Point, Value)>, default_order: ByteOrder) -> WriteSet {
    let mut staged = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();

    for (point, value) in entries {
        if !point::is_writable(&point) {
            rejected.push((point.name, ErrorCode::TagReadOnly));
            continue;
        }
        match codec::encode_for_write(&value, &point, default_order) {
            Ok(chunk) => staged.push(Staged { point, chunk }),
            Err(code) => rejected.push((point.name, code)),
        }
    }

    staged.sort_by(|a, b| by_location(&a.point, &b.point));

    // Group runs of contiguous points
    let mut runs: Vec<Vec<usize>> = Vec::new();
    for (idx, item) in staged.iter().enumerate() {
        if let Some(run) = runs.last_mut() {
            let first = &staged[run[0]].point;
            let last = &staged[run[run.len() - 1]].point;
            let contiguous = last.slave_id == item.point.slave_id
                && last.area == item.point.area
                && last.end_address() == u32::from(item.point.start_address);
            let span = item.point.end_address() - u32::from(first.start_address);
            if contiguous && span <= u32::from(item.point.area.max_write_quantity()) {
                run.push(idx);
                continue;
            }
        }
        runs.push(vec![idx]);
    }

    let commands = runs.iter().map(|run| write_command(&staged, run)).collect();

    CommandSet {
        points: staged.into_iter().map(|s| s.point).collect(),
        commands,
        rejected,
        address_base: 0,
        max_payload: 0,
    }
}

fn write_command(staged: &[Staged], run: &[usize]) -> WriteCommand {
    let first = &staged[run[0]].point;
    let count: u16 = run.iter().map(|&i| staged[i].point.count).sum();

    let (function_code, payload) = match first.area {
        Area::Coil => {
            let bits: Vec<bool> = run
                .iter()
                .map(|&i| matches!(staged[i].chunk, WriteChunk::Coil(true)))
                .collect();
            if count == 1 {
                let word = if bits[0] {
                    constants::COIL_ON
                } else {
                    constants::COIL_OFF
                };
                (constants::FC_WRITE_SINGLE_COIL, word.to_be_bytes().to_vec())
            } else {
                (constants::FC_WRITE_MULTIPLE_COILS, codec::pack_bits(&bits))
            }
        },
        _ => {
            let bytes: Vec<u8> = run
                .iter()
                .flat_map(|&i| match &staged[i].chunk {
                    WriteChunk::Registers(bytes) => bytes.clone(),
                    WriteChunk::Coil(_) => Vec::new(),
                })
                .collect();
            let fc = if count == 1 {
                constants::FC_WRITE_SINGLE_REGISTER
            } else {
                constants::FC_WRITE_MULTIPLE_REGISTERS
            };
            (fc, bytes)
        },
    };

    WriteCommand {
        slave_id: first.slave_id,
        area: first.area,
        start_address: first.start_address,
        count,
        function_code,
        payload,
        points: run.to_vec(),
    }
}
