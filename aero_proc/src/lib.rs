use proc_macro::TokenStream;

mod cpu_local;

/// Places a `static` into a per-CPU data section (`.cpu_local`, or
/// `.cpu_local_<name>` given `#[cpu_local(subsection = "<name>")]`) and wraps
/// its type in [`CpuLocal`](../aero_kernel/arch/x86_64/cpu_local/struct.CpuLocal.html),
/// which resolves `gs`-relative accesses to the per-CPU copy at runtime.
#[proc_macro_attribute]
pub fn cpu_local(attr: TokenStream, item: TokenStream) -> TokenStream {
    cpu_local::parse(attr, item)
}
