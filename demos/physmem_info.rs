use gpu_physmem::device::heap::{LmaHeap, PhysHeapRegion, PhysHeapRole, UmaHeap};
use gpu_physmem::host::{HostPageBackend, HostPmrFactory};
use gpu_physmem::{AllocFlags, AllocationRequest, DeviceConfig, DeviceId, DeviceNode, Physmem, PhysmemConfig};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    println!("============================================================");
    println!("               GPU Physmem - Host Diagnostics               ");
    println!("============================================================");

    let config = match PhysmemConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("[-] Bad configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!("[+] OS page size:  {:#x}", config.os_page_size());
    println!("[+] System RAM:    {} MiB", config.ram_size >> 20);
    println!("[+] Max PMR size:  {:#x}", config.max_pmr_size);

    let backend = Arc::new(HostPageBackend::new());
    let carveout = LmaHeap::new(vec![
        PhysHeapRegion { base: 0x8000_0000, size: 256 << 20 },
        PhysHeapRegion { base: 0x9000_0000, size: 128 << 20 },
    ]);
    let device = DeviceNode::builder(DeviceId(0), backend.clone())
        .config(DeviceConfig::new().check_mem_alloc_size(|bytes| {
            if bytes > 64 << 20 {
                Err(gpu_physmem::PhysmemError::OutOfMemory)
            } else {
                Ok(())
            }
        }))
        .heap(Arc::new(carveout), &[PhysHeapRole::GpuLocal])
        .heap(Arc::new(UmaHeap::new()), &[PhysHeapRole::CpuLocal, PhysHeapRole::FwLocal])
        .pmr_factory_all(Arc::new(HostPmrFactory::new()))
        .build();

    let physmem = Physmem::new(config);

    let totals = physmem.max_dev_mem_size(None, &device);
    println!("\n[+] Device memory");
    println!("    LMA: {} MiB", totals.lma >> 20);
    println!("    UMA: {} MiB", totals.uma >> 20);

    println!("\n[+] Allocating");
    let requests = [
        ("single page", AllocationRequest::new(4096, 12)),
        ("odd size", AllocationRequest::new(10_000, 12).flags(AllocFlags::new().zero_on_alloc())),
        ("sparse 64K", AllocationRequest::new(8 << 16, 16).sparse(1 << 16, 8, vec![0, 3, 7])),
        ("cpu local", AllocationRequest::new(1 << 21, 21).flags(AllocFlags::new().cpu_local())),
        ("over budget", AllocationRequest::new(128 << 20, 12)),
    ];

    let mut live = Vec::new();
    for (name, mut req) in requests {
        match physmem.new_ram_backed_pmr(None, &device, &mut req) {
            Ok(pmr) => {
                println!(
                    "    {name:<12} ok   size {:#x} log2 {} ({} blocks live)",
                    pmr.logical_size(),
                    req.log2_page_size,
                    backend.outstanding()
                );
                live.push(pmr);
            }
            Err(e) => println!("    {name:<12} fail {e}"),
        }
    }

    drop(live);
    println!("\n[+] Released, {} blocks live", backend.outstanding());

    ExitCode::SUCCESS
}
