//! Payload layout, import table synthesis, relocation, and the final splice into the stub.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use snafu::prelude::*;

use elfpress_elf::prelude::*;
use elfpress_elf::{SHN_COMMON, SHN_LORESERVE};
use elfpress_pack::prelude::*;
use elfpress_pack::search;

use crate::error::{
    NoEntrySymbolSnafu, PayloadTooLargeSnafu, RelocationOutOfRangeSnafu, Result,
    RoundTripMismatchSnafu, WrongRelocationFlavorSnafu,
};
use crate::hash::import_hash;
use crate::stub::{ArchSpec, StubTemplate};
use crate::{BASE, LOAD_BIAS, MAX_IMAGE};

/// Caller-side tuning for one link run.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkOptions {
    /// Initial compression parameters; joins the search population when non-empty.
    pub params: CompressionParameters,
    /// Parameter search tuning.
    pub search: SearchConfig,
    /// Fail instead of warn when round-trip verification finds diverging bytes.
    pub strict: bool,
}

/// Everything a link run produces: the final file image plus the intermediate artifacts worth
/// inspecting.
pub struct LinkOutput {
    /// The finished executable.
    pub image: Vec<u8>,
    /// The uncompressed payload, for debugging dumps.
    pub payload: Vec<u8>,
    /// The parameters the search settled on.
    pub params: CompressionParameters,
}

/// Links a loaded object against a stub template.
///
/// # Errors
/// Fails for objects without a `_start` symbol, malformed stub templates, relocations pointing
/// outside the payload, payloads beyond the runtime limit, coder failures, and (in strict mode)
/// round-trip mismatches. Unknown relocation types and unresolved imports are logged and
/// skipped, matching what the output binary can survive.
pub fn link(image: &Image, template: &[u8], options: &LinkOptions) -> Result<LinkOutput> {
    let spec = ArchSpec::for_arch(image.arch());
    let stub = StubTemplate::split(template)?;

    let symbols = image.symbol_table()?;
    let start_offset = find_start(&symbols)?;

    let (mut layout, imports, common) = discover(image, spec)?;

    // Payload: stub suffix, then one jump-table slot per import plus an all-zero terminator.
    let mut payload = stub.suffix.to_vec();
    let tailoff = payload.len();
    let hash_off = payload.len();
    for name in &imports {
        log::debug!("Import {name:<15} @ {:#010x}", payload.len());
        emit_slot(&mut payload, spec, import_hash(name));
    }
    payload.extend(core::iter::repeat(0).take(spec.slot_width));

    // The stub ends with a relative jump; aim it at _start, which sits right behind the jump
    // table once the text sections land.
    let jump = (payload.len() as u32)
        .wrapping_add(start_offset as u32)
        .wrapping_sub(tailoff as u32);
    payload[tailoff - 4..tailoff].copy_from_slice(&jump.to_le_bytes());

    // Place text first, everything else after, packed without alignment.
    place_sections(image, &mut layout, &mut payload, true)?;
    place_sections(image, &mut layout, &mut payload, false)?;

    // Common symbols and .bss live past the payload body and are never written out; only their
    // addresses matter.
    let common_base = (payload.len() + 255) & !255;
    if image.section_by_name(".bss").is_some() {
        log::info!("Section {:<15} @ {common_base:#010x}", ".bss");
        layout.insert(String::from(".bss"), common_base as u64);
    }

    relocate(image, spec, &layout, &imports, &common, common_base, hash_off, &mut payload)?;

    ensure!(payload.len() <= MAX_IMAGE, PayloadTooLargeSnafu { size: payload.len() });

    // Tune the coder for this exact payload and keep the canonical stream, reversed the way the
    // stub reads it.
    let mut coder = Coder::new();
    let mut params = options.params;
    let mut stream = search::optimize(&mut coder, &mut params, &payload, MAX_IMAGE, &options.search)?;
    stream.reverse();

    verify_round_trip(&mut coder, &params, &stream, &payload, options.strict)?;

    // Final image: prefix, the metadata bytes from just before the signature, the reversed
    // stream, the decompressed bit count, and the parameter trailer the stub reads at startup.
    let mut file = stub.prefix.to_vec();
    file.extend_from_slice(stub.metadata());
    file.extend_from_slice(&stream);
    let code_end = BASE.wrapping_add(file.len() as u32).wrapping_sub(4);
    patch32(&mut file, spec.code_end_patch, code_end)?;

    file.extend_from_slice(&((payload.len() * 8) as u32).to_le_bytes());
    file.extend_from_slice(&params.weights[..params.context_count]);
    file.extend_from_slice(&params.contexts[..params.context_count]);

    let file_len = file.len();
    if spec.file_size_is_64 {
        patch64(&mut file, spec.file_size_patch, file_len as u64)?;
    } else {
        patch32(&mut file, spec.file_size_patch, file_len as u32)?;
    }

    Ok(LinkOutput { image: file, payload, params })
}

/// Scans the symbol table for `_start`. The last definition wins.
fn find_start(symbols: &SymbolTable<'_>) -> Result<u64> {
    let mut start = None;
    for symbol in symbols.iter() {
        let symbol = symbol?;
        if symbol.name == "_start" {
            start = Some(symbol.value);
        }
    }
    start.context(NoEntrySymbolSnafu)
}

/// A malformed object caught past loading, reported through the loader's error type.
fn bad_object(reason: &'static str) -> crate::Error {
    crate::Error::Elf { source: ElfError::InvalidElf { reason } }
}

type Discovery = (BTreeMap<String, u64>, BTreeSet<String>, HashMap<u32, u64>);

/// Walks every relocation table to find the reachable sections, the imported symbols, and the
/// common-symbol allocations.
fn discover(image: &Image, spec: &ArchSpec) -> Result<Discovery> {
    let mut layout = BTreeMap::new();
    let mut imports = BTreeSet::new();
    let mut common = HashMap::new();

    // Commons are stacked after .bss, so their running offset starts past it.
    let mut common_off =
        image.section_by_name(".bss").map_or(0, |section| section.header.size);

    // The entry point lives in .text whether or not a relocation mentions it.
    if image.section_by_name(".text").is_some() {
        layout.insert(String::from(".text"), 0);
    }

    for section in image.sections() {
        check_flavor(&section.name, spec)?;
        if !section.name.starts_with(spec.rel_prefix) {
            continue;
        }
        let relocs = RelocationTable::new(image.arch(), section)?;
        let symbols = image.symbol_table_for(
            image
                .section(section.header.link as usize)
                .ok_or_else(|| bad_object("relocation symtab link out of range"))?,
        )?;
        for reloc in relocs.iter() {
            let reloc = reloc?;
            let symbol = symbols.get(reloc.symbol as usize)?;
            if symbol.shndx != 0 && symbol.shndx < SHN_LORESERVE {
                if let Some(target) = image.section(usize::from(symbol.shndx)) {
                    if target.name != ".bss" {
                        layout.entry(target.name.clone()).or_insert(0);
                    }
                }
            }
            if symbol.kind == SymbolKind::NoType && symbol.bind == SymbolBind::Global {
                imports.insert(symbol.name.clone());
            }
            if symbol.shndx == SHN_COMMON && !common.contains_key(&symbol.name_offset) {
                common.insert(symbol.name_offset, common_off);
                common_off += symbol.size;
            }
        }
    }

    Ok((layout, imports, common))
}

/// Rejects relocation sections of the flavor the other architecture uses: 32-bit objects carry
/// `.rel.*` only, 64-bit objects `.rela.*` only.
fn check_flavor(name: &str, spec: &ArchSpec) -> Result<()> {
    let wrong = match spec.arch {
        Arch::I386 => name.starts_with(".rela."),
        Arch::X86_64 => name.starts_with(".rel.") && !name.starts_with(".rela."),
    };
    ensure!(!wrong, WrongRelocationFlavorSnafu { name });
    Ok(())
}

fn emit_slot(payload: &mut Vec<u8>, spec: &ArchSpec, hash: u32) {
    match spec.arch {
        Arch::I386 => {
            // e9 xx xx xx xx  jmp rel32; the stub rewrites the hash into a real displacement.
            payload.push(0xE9);
            payload.extend_from_slice(&hash.to_le_bytes());
        }
        Arch::X86_64 => {
            // ff 25 00 00 00 00  jmp [rip+0], followed by the hash where the resolved absolute
            // address ends up.
            payload.extend_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
            payload.extend_from_slice(&u64::from(hash).to_le_bytes());
        }
    }
}

/// Assigns offsets and appends data for the sections in the layout map, taking `.text*` names in
/// the first pass and the rest in the second.
fn place_sections(
    image: &Image, layout: &mut BTreeMap<String, u64>, payload: &mut Vec<u8>, text_pass: bool,
) -> Result<()> {
    for (name, offset) in layout.iter_mut() {
        if name.starts_with(".text") != text_pass {
            continue;
        }
        let section = image
            .section_by_name(name)
            .ok_or_else(|| bad_object("laid-out section vanished"))?;
        *offset = payload.len() as u64;
        log::info!("Section {name:<15} @ {:#010x}", payload.len());
        payload.extend_from_slice(&section.data);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn relocate(
    image: &Image, spec: &ArchSpec, layout: &BTreeMap<String, u64>, imports: &BTreeSet<String>,
    common: &HashMap<u32, u64>, common_base: usize, hash_off: usize, payload: &mut [u8],
) -> Result<()> {
    for section in image.sections() {
        if !section.name.starts_with(spec.rel_prefix) {
            continue;
        }
        // ".rel.text" -> ".text"
        let target = &section.name[spec.rel_prefix.len() - 1..];
        let Some(&secoff) = layout.get(target) else { continue };
        log::debug!("Relocating {target}");

        let relocs = RelocationTable::new(image.arch(), section)?;
        let symbols = image.symbol_table_for(
            image
                .section(section.header.link as usize)
                .ok_or_else(|| bad_object("relocation symtab link out of range"))?,
        )?;

        for reloc in relocs.iter() {
            let reloc = reloc?;
            let symbol = symbols.get(reloc.symbol as usize)?;
            log::trace!(
                "  {:#06x} type {:2} sym {:3} {:<20} {:?} {:?} value {:#x} size {:#x} shndx {:#x}",
                reloc.offset,
                reloc.kind,
                reloc.symbol,
                symbol.name,
                symbol.bind,
                symbol.kind,
                symbol.value,
                symbol.size,
                symbol.shndx,
            );

            let target_va: u32 = if symbol.shndx != 0 && symbol.shndx < SHN_LORESERVE {
                let section_name = image
                    .section(usize::from(symbol.shndx))
                    .map(|section| section.name.as_str())
                    .unwrap_or("");
                let base = layout.get(section_name).copied().unwrap_or(0);
                BASE.wrapping_add(base as u32).wrapping_add(symbol.value as u32)
            } else if symbol.shndx == SHN_COMMON {
                let offset = common.get(&symbol.name_offset).copied().unwrap_or(0);
                BASE.wrapping_add(common_base as u32).wrapping_add(offset as u32)
            } else if symbol.shndx == 0 {
                match imports.iter().position(|name| *name == symbol.name) {
                    Some(rank) => BASE
                        .wrapping_add(hash_off as u32)
                        .wrapping_add((spec.slot_width * rank) as u32),
                    None => {
                        log::warn!("Unresolved import {}", symbol.name);
                        continue;
                    }
                }
            } else {
                log::warn!("Unknown section {:#x}", symbol.shndx);
                0
            };

            let at = secoff
                .checked_add(reloc.offset)
                .and_then(|sum| usize::try_from(sum).ok())
                .unwrap_or(usize::MAX);
            let width: usize =
                if image.arch().is_64() && reloc.kind == elfpress_elf::R_X86_64_64 { 8 } else { 4 };
            ensure!(
                at.checked_add(width).is_some_and(|end| end <= payload.len()),
                RelocationOutOfRangeSnafu { name: section.name.clone(), offset: reloc.offset }
            );

            apply(payload, at, spec, secoff, target_va, &reloc);
        }
    }
    Ok(())
}

/// Applies one relocation at `at`. Unknown types are reported and left untouched.
fn apply(
    payload: &mut [u8], at: usize, spec: &ArchSpec, secoff: u64, target_va: u32,
    reloc: &Relocation,
) {
    use elfpress_elf::{R_386_32, R_386_PC32, R_X86_64_32, R_X86_64_64, R_X86_64_PC32};

    match (spec.arch, reloc.kind) {
        (Arch::I386, R_386_32) => {
            add32(payload, at, target_va.wrapping_add(LOAD_BIAS));
        }
        (Arch::I386, R_386_PC32) => {
            let value = target_va
                .wrapping_sub(reloc.offset as u32)
                .wrapping_sub(secoff as u32)
                .wrapping_sub(BASE);
            add32(payload, at, value);
        }
        (Arch::X86_64, R_X86_64_64) => {
            let value = (i64::from(target_va.wrapping_add(LOAD_BIAS)))
                .wrapping_add(reloc.addend) as u64;
            add64(payload, at, value);
        }
        (Arch::X86_64, R_X86_64_32) => {
            let value = (i64::from(target_va.wrapping_add(LOAD_BIAS)))
                .wrapping_add(reloc.addend) as u32;
            add32(payload, at, value);
        }
        (Arch::X86_64, R_X86_64_PC32) => {
            let value = u64::from(target_va)
                .wrapping_sub(reloc.offset)
                .wrapping_sub(secoff)
                .wrapping_sub(u64::from(BASE))
                .wrapping_add(reloc.addend as u64) as u32;
            add32(payload, at, value);
        }
        (_, kind) => log::warn!("Unknown relocation type {kind}"),
    }
}

fn add32(payload: &mut [u8], at: usize, delta: u32) {
    let mut word = [0u8; 4];
    word.copy_from_slice(&payload[at..at + 4]);
    let value = u32::from_le_bytes(word).wrapping_add(delta);
    payload[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn add64(payload: &mut [u8], at: usize, delta: u64) {
    let mut word = [0u8; 8];
    word.copy_from_slice(&payload[at..at + 8]);
    let value = u64::from_le_bytes(word).wrapping_add(delta);
    payload[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// Decompresses the fresh stream and compares it against the payload, reporting the first ten
/// diverging offsets. Only strict mode turns a mismatch into an error.
fn verify_round_trip(
    coder: &mut Coder, params: &CompressionParameters, stream: &[u8], payload: &[u8], strict: bool,
) -> Result<()> {
    let decoded = coder.decompress(params, stream, payload.len());
    if decoded == payload {
        return Ok(());
    }

    let mismatches = decoded
        .iter()
        .zip(payload.iter())
        .filter(|(decoded, expected)| decoded != expected)
        .count();
    log::warn!("Decompression failed, first 10 different bytes");
    for (offset, (decoded, expected)) in decoded
        .iter()
        .zip(payload.iter())
        .enumerate()
        .filter(|(_, (decoded, expected))| decoded != expected)
        .take(10)
    {
        log::warn!("{offset:#8x}: {expected:02x} != {decoded:02x}");
    }
    ensure!(!strict, RoundTripMismatchSnafu { mismatches });
    Ok(())
}

fn patch32(file: &mut [u8], at: usize, value: u32) -> Result<()> {
    ensure!(at + 4 <= file.len(), crate::error::StubTooSmallSnafu);
    file[at..at + 4].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn patch64(file: &mut [u8], at: usize, value: u64) -> Result<()> {
    ensure!(at + 8 <= file.len(), crate::error::StubTooSmallSnafu);
    file[at..at + 8].copy_from_slice(&value.to_le_bytes());
    Ok(())
}
